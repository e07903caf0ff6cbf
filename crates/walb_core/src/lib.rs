//! The WalB I/O pipeline: lsid watermarks, pack builder, log submitter,
//! permanence gate, pending index, overlap serializer, data submitter,
//! completion/GC, and device state machine, wired onto a generic
//! [`walb_device::BlockDevice`] pair by [`device::WalbDevice`].

pub mod bio;
pub mod completion;
pub mod data_submitter;
pub mod device;
pub mod error;
pub mod log_submitter;
pub mod lsid_state;
pub mod pack;
pub mod params;
pub mod permanence;
pub mod queue;
pub mod state;
pub mod watch;

pub use bio::{BioFlags, BioWrapper};
pub use device::{format_ldev, next_minor_id, read_superblock, WalbDevice};
pub use error::{Result, WalbError};
pub use lsid_state::{LsidState, Watermarks};
pub use pack::{Pack, PackBuilder, LBS};
pub use params::{DiscardPolicy, WalbParams};
pub use permanence::PermanenceGate;
pub use queue::WorkQueue;
pub use state::{DeviceFlags, DeviceState};
pub use watch::LsidWatch;
