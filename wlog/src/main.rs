//! `wlog`: extract (`cat`) and replay (`restore`) tools over the WalB
//! wire format (spec.md §7, §8). Both walk the ring buffer strictly in
//! lsid order and stop at the first invalid header or record, per
//! spec.md §7's recovery contract -- a torn write at the tail of the
//! log is expected, not an error to propagate past.
//!
//! Neither subcommand has access to a running pipeline's watermarks,
//! so the caller must supply `--end-lsid` (typically the `permanent`
//! lsid reported by `walb-ctl status`): extracting or replaying past it
//! would read log entries the data device is not yet guaranteed to
//! reflect (spec.md Non-goals: extraction must honor the permanent
//! watermark).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use walb_device::{BlockDevice, FileDevice};
use walb_wire::{Lsid, LogpackHeader, Pbs, RecordFlags, SuperBlock, SUPER_BLOCK_OFFSET_BYTES};

const LBS: u32 = 512;

#[derive(Parser)]
#[command(name = "wlog", about = "Extract or replay a WalB log device")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints every logpack header and record between `start-lsid` and
    /// `end-lsid`, stopping early on the first decode failure.
    Cat {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long, default_value_t = 0)]
        start_lsid: u64,
        #[arg(long)]
        end_lsid: u64,
    },
    /// Replays EXIST records from `ldev` onto `ddev`, in lsid order.
    Restore {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
        #[arg(long, default_value_t = 0)]
        start_lsid: u64,
        #[arg(long)]
        end_lsid: u64,
        /// Zero the corresponding data-device range for DISCARD records
        /// instead of leaving it untouched.
        #[arg(long, default_value_t = false)]
        apply_discards: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Cat { ldev, start_lsid, end_lsid } => cat(&ldev, Lsid::new(start_lsid), Lsid::new(end_lsid)),
        Command::Restore {
            ldev,
            ddev,
            start_lsid,
            end_lsid,
            apply_discards,
        } => restore(&ldev, &ddev, Lsid::new(start_lsid), Lsid::new(end_lsid), apply_discards),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("wlog: {e}");
            ExitCode::FAILURE
        }
    }
}

fn open_ldev_with_superblock(path: &PathBuf) -> anyhow::Result<(FileDevice, SuperBlock)> {
    let ldev = FileDevice::open(path, Pbs::new(4096).expect("4096 is a valid pbs"))?;
    let mut buf = vec![0u8; ldev.pbs().as_usize()];
    let block_index = SUPER_BLOCK_OFFSET_BYTES / u64::from(ldev.pbs().value());
    ldev.read_at(block_index, &mut buf)?;
    let sb = SuperBlock::decode(&buf)?;
    Ok((ldev, sb))
}

fn ring_block_pos(lsid: Lsid, ring_buffer_pb: u64, ring_buffer_off: u64) -> u64 {
    lsid.ring_pos(ring_buffer_pb) + ring_buffer_off
}

/// Reads one logpack at `lsid`, returning the decoded header and the
/// payload blocks immediately following it (not yet split per record).
fn read_pack(ldev: &FileDevice, sb: &SuperBlock, lsid: Lsid) -> anyhow::Result<(LogpackHeader, Vec<u8>)> {
    let pbs = ldev.pbs();
    let pos = ring_block_pos(lsid, sb.ring_buffer_pb, sb.ring_buffer_offset_pb);
    let mut header_buf = vec![0u8; pbs.as_usize()];
    ldev.read_at(pos, &mut header_buf)?;
    let header = LogpackHeader::decode(&header_buf, pbs, sb.salt)?;

    let mut payload = vec![0u8; header.total_io_size as usize * pbs.as_usize()];
    for i in 0..u64::from(header.total_io_size) {
        let block_pos = ring_block_pos(lsid.add_pb(u32::try_from(1 + i).unwrap()), sb.ring_buffer_pb, sb.ring_buffer_offset_pb);
        let start = i as usize * pbs.as_usize();
        ldev.read_at(block_pos, &mut payload[start..start + pbs.as_usize()])?;
    }
    Ok((header, payload))
}

fn cat(ldev_path: &PathBuf, start_lsid: Lsid, end_lsid: Lsid) -> anyhow::Result<()> {
    let (ldev, sb) = open_ldev_with_superblock(ldev_path)?;
    let mut lsid = start_lsid;

    while lsid < end_lsid {
        let (header, _payload) = match read_pack(&ldev, &sb, lsid) {
            Ok(v) => v,
            Err(e) => {
                println!("stopping at lsid {lsid}: {e}");
                break;
            }
        };

        if header.is_zero_flush_only() {
            println!("lsid={lsid} zero-length-flush");
            lsid = lsid.add_pb(1);
            continue;
        }

        for rec in &header.records {
            println!(
                "lsid={} pos_lb={} len_lb={} flags={:?}",
                rec.lsid(header.logpack_lsid),
                rec.offset_lb(),
                rec.io_size_lb(),
                rec.flags()
            );
        }
        lsid = lsid.add_pb(1 + header.total_io_size);
    }
    Ok(())
}

fn restore(ldev_path: &PathBuf, ddev_path: &PathBuf, start_lsid: Lsid, end_lsid: Lsid, apply_discards: bool) -> anyhow::Result<()> {
    let (ldev, sb) = open_ldev_with_superblock(ldev_path)?;
    let ddev = FileDevice::open(ddev_path, ldev.pbs())?;
    let pbs = ldev.pbs();
    let spb = pbs.value() / LBS;
    let mut lsid = start_lsid;
    let mut n_applied = 0u64;

    while lsid < end_lsid {
        let (header, payload) = match read_pack(&ldev, &sb, lsid) {
            Ok(v) => v,
            Err(e) => {
                println!("stopping at lsid {lsid}: {e}");
                break;
            }
        };

        if header.is_zero_flush_only() {
            lsid = lsid.add_pb(1);
            continue;
        }

        let mut offset_pb = 0u64;
        for rec in &header.records {
            let flags = rec.flags();
            let pb_len = u64::from(rec.io_size_lb()).div_ceil(u64::from(spb)).max(1);

            if flags.contains(RecordFlags::DISCARD) {
                if apply_discards {
                    let block_index = rec.offset_lb() / u64::from(spb);
                    ddev.discard_at(block_index, pb_len)?;
                }
                continue;
            }
            if flags.contains(RecordFlags::PADDING) {
                offset_pb += pb_len;
                continue;
            }

            let block_index = rec.offset_lb() / u64::from(spb);
            let start = offset_pb as usize * pbs.as_usize();
            for i in 0..pb_len {
                let chunk_start = start + i as usize * pbs.as_usize();
                ddev.write_at(block_index + i, &payload[chunk_start..chunk_start + pbs.as_usize()])?;
            }
            offset_pb += pb_len;
            n_applied += 1;
        }
        lsid = lsid.add_pb(1 + header.total_io_size);
    }

    ddev.flush()?;
    println!("replayed {n_applied} records up to lsid {lsid}");
    Ok(())
}
