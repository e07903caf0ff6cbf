//! Scenario 4 (spec.md §8): a logpack's data records must never reach
//! the data device before the logpack itself is permanent (flushed to
//! the log device), even when nothing else forces an earlier flush.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tests::support::Shared;
use walb_core::{next_minor_id, WalbDevice, WalbParams};
use walb_device::MemDevice;
use walb_wire::{Lsid, Pbs};

#[test]
fn write_blocks_on_ddev_until_its_logpack_is_permanent() {
    let pbs = Pbs::new(512).unwrap();
    let ldev = MemDevice::new(pbs, 1 + 64);
    let ddev_inner = Arc::new(MemDevice::new(pbs, 16));

    // Default params: a 100ms periodic flush is the only trigger that
    // will ever promote `permanent` here, since a single small write
    // never crosses the size trigger.
    let params = WalbParams::new("scenario4");
    let dev = Arc::new(WalbDevice::create_wdev(params, ldev, Shared(Arc::clone(&ddev_inner)), 0x99, 64, 1, Lsid::new(0), next_minor_id()).unwrap());

    let dev1 = Arc::clone(&dev);
    let t = thread::spawn(move || dev1.write(0, vec![0x99u8; 512], false).unwrap());

    thread::sleep(Duration::from_millis(30));
    assert!(!t.is_finished(), "write should still be waiting on the periodic permanence gate");
    assert_eq!(dev.get_permanent_lsid(), Lsid::new(0));
    assert_eq!(
        ddev_inner.snapshot()[..512],
        vec![0u8; 512][..],
        "data device must not see the write before its logpack is permanent"
    );

    t.join().unwrap();
    assert!(dev.get_permanent_lsid() > Lsid::new(0));
    assert_eq!(ddev_inner.snapshot()[..512], vec![0x99u8; 512][..]);

    dev.delete_wdev();
}
