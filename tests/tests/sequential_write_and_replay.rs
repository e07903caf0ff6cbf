//! Scenario 1 (spec.md §8): sequential writes, extracted and replayed
//! onto a fresh device, must reproduce the data device byte-for-byte.

use std::sync::Arc;

use tests::support::{self, Shared};
use walb_core::{next_minor_id, WalbDevice, WalbParams};
use walb_device::MemDevice;
use walb_wire::{Lsid, Pbs};

#[test]
fn sequential_writes_replay_to_identical_ddev_contents() {
    let pbs = Pbs::new(4096).unwrap();
    let ring_buffer_pb = 2048;
    let ring_buffer_offset_pb = 1;
    let ddev_blocks = 1024;

    let ldev = Arc::new(MemDevice::new(pbs, ring_buffer_offset_pb + ring_buffer_pb));
    let ddev = Arc::new(MemDevice::new(pbs, ddev_blocks));

    let params = WalbParams::new("scenario1");
    let dev = WalbDevice::create_wdev(
        params,
        Shared(Arc::clone(&ldev)),
        Shared(Arc::clone(&ddev)),
        0x1357_9BDF,
        ring_buffer_pb,
        ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )
    .unwrap();

    let len_lb = 16u32; // 8 KiB, addressed in 512-byte logical blocks
    for i in 0..512u64 {
        let byte = u8::try_from((i % 251) + 1).unwrap();
        let data = vec![byte; len_lb as usize * walb_core::LBS as usize];
        dev.write(i * u64::from(len_lb), data, false).unwrap();
    }

    assert_eq!(dev.get_written_lsid(), dev.get_permanent_lsid());
    assert_eq!(dev.get_log_usage(), dev.get_written_lsid().value(), "oldest never advanced from 0");

    let sb = support::fake_superblock(pbs, 0x1357_9BDF, ring_buffer_pb, ring_buffer_offset_pb, ddev_blocks * 8);
    let replay_target = MemDevice::new(pbs, ddev_blocks);
    support::replay(&Shared(Arc::clone(&ldev)), &sb, &replay_target, Lsid::new(0), dev.get_permanent_lsid()).unwrap();

    assert_eq!(replay_target.snapshot(), ddev.snapshot(), "replaying the extracted log reproduces the data device exactly");

    dev.delete_wdev();
}
