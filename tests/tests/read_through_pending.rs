//! Scenario 3 (spec.md §8): a write that has been logged but not yet
//! applied to the data device must still be visible to a concurrent
//! read through the pending index.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tests::support::{Shared, SlowWrite};
use walb_core::{next_minor_id, WalbDevice, WalbParams};
use walb_device::MemDevice;
use walb_wire::{Lsid, Pbs};

#[test]
fn read_during_in_flight_write_sees_pending_bytes() {
    let pbs = Pbs::new(512).unwrap();
    let ldev = MemDevice::new(pbs, 1 + 64);
    let ddev_inner = Arc::new(MemDevice::new(pbs, 16));
    let ddev = SlowWrite::new(Shared(Arc::clone(&ddev_inner)), Duration::from_millis(60));

    let params = WalbParams::new("scenario3");
    let dev = Arc::new(WalbDevice::create_wdev(params, ldev, ddev, 0x2468, 64, 1, Lsid::new(0), next_minor_id()).unwrap());

    let dev1 = Arc::clone(&dev);
    let t = thread::spawn(move || dev1.write(0, vec![0x77u8; 512], false).unwrap());

    // Give the write time to clear the log thread (fast) and land in
    // the pending index, while it is still sleeping in the data
    // device's write.
    thread::sleep(Duration::from_millis(20));
    let during = dev.read(0, 1).unwrap();
    assert_eq!(during, vec![0x77u8; 512], "read must see pending bytes before the data device write completes");
    assert_eq!(
        ddev_inner.snapshot()[..512],
        vec![0u8; 512][..],
        "the data device itself must not have been touched yet"
    );

    t.join().unwrap();

    let after = dev.read(0, 1).unwrap();
    assert_eq!(after, vec![0x77u8; 512]);
    assert_eq!(ddev_inner.snapshot()[..512], vec![0x77u8; 512][..], "once complete the data device itself carries the bytes");

    dev.delete_wdev();
}
