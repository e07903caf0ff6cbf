//! Scenario 2 (spec.md §8): two writes to the same lba, submitted while
//! the first is still in flight, must leave the data device holding
//! whichever payload was submitted second, with nothing left pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tests::support::Shared;
use tests::support::SlowWrite;
use walb_core::{next_minor_id, WalbDevice, WalbParams};
use walb_device::MemDevice;
use walb_wire::{Lsid, Pbs};

#[test]
fn second_writer_to_same_lba_wins_and_pending_drains() {
    let pbs = Pbs::new(512).unwrap();
    let ldev = MemDevice::new(pbs, 1 + 64);
    let ddev_inner = Arc::new(MemDevice::new(pbs, 16));
    let ddev = SlowWrite::new(Shared(Arc::clone(&ddev_inner)), Duration::from_millis(40));

    let params = WalbParams::new("scenario2");
    let dev = Arc::new(WalbDevice::create_wdev(params, ldev, ddev, 0xA5A5, 64, 1, Lsid::new(0), next_minor_id()).unwrap());

    let first_done = Arc::new(AtomicBool::new(false));

    let dev1 = Arc::clone(&dev);
    let first_done1 = Arc::clone(&first_done);
    let t1 = thread::spawn(move || {
        dev1.write(0, vec![0xAAu8; 512], false).unwrap();
        first_done1.store(true, Ordering::SeqCst);
    });

    // Give the first write a head start into the pipeline before the
    // second one is submitted, so they are genuinely overlapping: the
    // data device write for the first is still sleeping when the
    // second reaches the data stage.
    thread::sleep(Duration::from_millis(10));
    assert!(!first_done.load(Ordering::SeqCst), "first write should still be in flight");

    let dev2 = Arc::clone(&dev);
    let t2 = thread::spawn(move || dev2.write(0, vec![0xBBu8; 512], false).unwrap());

    t1.join().unwrap();
    t2.join().unwrap();

    let read_back = dev.read(0, 1).unwrap();
    assert_eq!(read_back, vec![0xBBu8; 512], "the later write must be the one the data device ends up holding");
    assert_eq!(ddev_inner.snapshot()[..512], vec![0xBBu8; 512][..]);

    dev.delete_wdev();
}
