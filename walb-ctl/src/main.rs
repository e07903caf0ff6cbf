//! `walb-ctl`: a thin CLI control surface over an in-process
//! `WalbDevice` (spec.md §6). The real ioctl/sysfs transport stays out
//! of scope; each subcommand opens its own `FileDevice` pair, performs
//! one control operation, and exits -- there is no long-running daemon
//! behind this binary, so watermark state does not persist across
//! invocations beyond whatever the superblock records.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use walb_core::{format_ldev, next_minor_id, read_superblock, WalbDevice, WalbParams};
use walb_device::FileDevice;
use walb_wire::{Lsid, Pbs};

#[derive(Parser)]
#[command(name = "walb-ctl", about = "Control surface for a WalB-style block WAL device")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Writes a fresh superblock to an LDEV file (spec.md §6 "format").
    Format {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long, default_value_t = 4096)]
        pbs: u32,
        #[arg(long, default_value_t = 65536)]
        ring_buffer_pb: u64,
        #[arg(long, default_value_t = 1)]
        ring_buffer_offset_pb: u64,
        #[arg(long, default_value_t = 0xA5A5_A5A5)]
        salt: u32,
        #[arg(long, default_value_t = 1 << 20)]
        ddev_size_lb: u64,
    },
    /// Reports the superblock and watermark state for a fresh device
    /// open (spec.md §6 get_* operations).
    Status {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
    },
    /// Issues a single write through the full pipeline (demo/testing
    /// helper, not itself a spec.md §6 operation).
    Write {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
        #[arg(long)]
        pos_lb: u64,
        /// Byte repeated to fill the write payload.
        #[arg(long, default_value_t = 0)]
        fill: u8,
        #[arg(long)]
        len_lb: u32,
        #[arg(long)]
        flush: bool,
    },
    /// Advances the oldest retained lsid, reclaiming ring-buffer space
    /// (spec.md §6 "set_oldest_lsid").
    SetOldestLsid {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
        #[arg(long)]
        lsid: u64,
    },
    /// Stops accepting new writes until melted (spec.md §6 "freeze").
    Freeze {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
    },
    /// Resumes accepting writes after a freeze (spec.md §6 "melt").
    Melt {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
    },
    /// Discards all logpacks and resets every watermark to `lsid`
    /// (spec.md §6 "reset_wal"). The caller is responsible for the
    /// device being idle first; this does not itself freeze.
    ResetWal {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
        #[arg(long, default_value_t = 0)]
        lsid: u64,
    },
    /// Reports the checkpoint interval (spec.md §6
    /// "get_checkpoint_interval").
    GetCheckpointInterval {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
    },
    /// Sets the checkpoint interval (spec.md §6
    /// "set_checkpoint_interval").
    SetCheckpointInterval {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
        #[arg(long)]
        seconds: u64,
    },
    /// Updates the logical size WalB reports for the data device
    /// (spec.md §6 "resize").
    Resize {
        #[arg(long)]
        ldev: PathBuf,
        #[arg(long)]
        ddev: PathBuf,
        #[arg(long)]
        ddev_size_lb: u64,
    },
}

fn open_pair(ldev: &PathBuf, ddev: &PathBuf) -> std::io::Result<(FileDevice, FileDevice)> {
    let ldev = FileDevice::open(ldev, Pbs::new(4096).expect("4096 is a valid pbs"))?;
    let ddev = FileDevice::open(ddev, ldev.pbs())?;
    Ok((ldev, ddev))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Format {
            ldev,
            pbs,
            ring_buffer_pb,
            ring_buffer_offset_pb,
            salt,
            ddev_size_lb,
        } => run_format(&ldev, pbs, ring_buffer_pb, ring_buffer_offset_pb, salt, ddev_size_lb),
        Command::Status { ldev, ddev } => run_status(&ldev, &ddev),
        Command::Write {
            ldev,
            ddev,
            pos_lb,
            fill,
            len_lb,
            flush,
        } => run_write(&ldev, &ddev, pos_lb, fill, len_lb, flush),
        Command::SetOldestLsid { ldev, ddev, lsid } => run_set_oldest_lsid(&ldev, &ddev, lsid),
        Command::Freeze { ldev, ddev } => run_freeze(&ldev, &ddev),
        Command::Melt { ldev, ddev } => run_melt(&ldev, &ddev),
        Command::ResetWal { ldev, ddev, lsid } => run_reset_wal(&ldev, &ddev, lsid),
        Command::GetCheckpointInterval { ldev, ddev } => run_get_checkpoint_interval(&ldev, &ddev),
        Command::SetCheckpointInterval { ldev, ddev, seconds } => run_set_checkpoint_interval(&ldev, &ddev, seconds),
        Command::Resize { ldev, ddev, ddev_size_lb } => run_resize(&ldev, &ddev, ddev_size_lb),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("walb-ctl: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_format(
    ldev_path: &PathBuf,
    pbs: u32,
    ring_buffer_pb: u64,
    ring_buffer_offset_pb: u64,
    salt: u32,
    ddev_size_lb: u64,
) -> anyhow::Result<()> {
    let pbs = Pbs::new(pbs)?;
    let total_pb = ring_buffer_offset_pb + ring_buffer_pb;
    let ldev = FileDevice::create(ldev_path, pbs, total_pb)?;
    format_ldev(&ldev, salt, ring_buffer_pb, ring_buffer_offset_pb, ddev_size_lb, rand_uuid())?;
    println!("formatted {} ({} physical blocks)", ldev_path.display(), total_pb);
    Ok(())
}

fn run_status(ldev_path: &PathBuf, ddev_path: &PathBuf) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    println!("version: {}", dev.get_version());
    println!("log capacity (pb): {}", dev.get_log_capacity());
    println!("log usage (pb): {}", dev.get_log_usage());
    println!("oldest lsid: {}", dev.get_oldest_lsid());
    println!("written lsid: {}", dev.get_written_lsid());
    println!("permanent lsid: {}", dev.get_permanent_lsid());
    println!("completed lsid: {}", dev.get_completed_lsid());
    println!("read-only: {}", dev.is_read_only());
    println!("log overflow: {}", dev.is_log_overflow());
    println!("flush capable: {}", dev.is_flush_capable());
    println!("checkpoint interval (s): {}", dev.get_checkpoint_interval().as_secs());
    println!("ddev size (lb): {}", dev.get_ddev_size_lb());
    dev.delete_wdev();
    Ok(())
}

fn run_write(
    ldev_path: &PathBuf,
    ddev_path: &PathBuf,
    pos_lb: u64,
    fill: u8,
    len_lb: u32,
    flush: bool,
) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    let data = vec![fill; len_lb as usize * walb_core::LBS as usize];
    dev.write(pos_lb, data, flush)?;
    println!("wrote {len_lb} logical blocks at {pos_lb}");
    dev.delete_wdev();
    Ok(())
}

fn run_set_oldest_lsid(ldev_path: &PathBuf, ddev_path: &PathBuf, lsid: u64) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    dev.set_oldest_lsid(Lsid::new(lsid));
    println!("oldest lsid set to {lsid}");
    dev.delete_wdev();
    Ok(())
}

fn run_freeze(ldev_path: &PathBuf, ddev_path: &PathBuf) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    dev.freeze();
    println!("frozen: {}", dev.is_frozen());
    dev.delete_wdev();
    Ok(())
}

fn run_melt(ldev_path: &PathBuf, ddev_path: &PathBuf) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    dev.melt();
    println!("frozen: {}", dev.is_frozen());
    dev.delete_wdev();
    Ok(())
}

fn run_reset_wal(ldev_path: &PathBuf, ddev_path: &PathBuf, lsid: u64) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    dev.freeze();
    dev.reset_wal(Lsid::new(lsid));
    dev.melt();
    println!("wal reset to lsid {lsid}");
    dev.delete_wdev();
    Ok(())
}

fn run_get_checkpoint_interval(ldev_path: &PathBuf, ddev_path: &PathBuf) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    println!("checkpoint interval (s): {}", dev.get_checkpoint_interval().as_secs());
    dev.delete_wdev();
    Ok(())
}

fn run_set_checkpoint_interval(ldev_path: &PathBuf, ddev_path: &PathBuf, seconds: u64) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    dev.set_checkpoint_interval(Duration::from_secs(seconds));
    println!("checkpoint interval set to {seconds}s");
    dev.delete_wdev();
    Ok(())
}

fn run_resize(ldev_path: &PathBuf, ddev_path: &PathBuf, ddev_size_lb: u64) -> anyhow::Result<()> {
    let (ldev, ddev) = open_pair(ldev_path, ddev_path)?;
    let sb = read_superblock(&ldev)?;
    let params = WalbParams::new("walb-ctl");
    let dev = WalbDevice::create_wdev(
        params,
        ldev,
        ddev,
        sb.salt,
        sb.ring_buffer_pb,
        sb.ring_buffer_offset_pb,
        Lsid::new(0),
        next_minor_id(),
    )?;
    dev.resize(ddev_size_lb)?;
    println!("ddev size set to {} logical blocks", dev.get_ddev_size_lb());
    dev.delete_wdev();
    Ok(())
}

/// Not a cryptographic UUID generator, just fills the superblock's
/// identity field deterministically from the process id so repeated
/// `format` runs in tests are distinguishable.
fn rand_uuid() -> [u8; 16] {
    let pid = std::process::id();
    let mut uuid = [0u8; 16];
    uuid[..4].copy_from_slice(&pid.to_ne_bytes());
    uuid
}
