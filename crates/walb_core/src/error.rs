use thiserror::Error;

/// Errors the pipeline can report to a caller.
///
/// Mirrors the teacher's split between an internal, richly-variant
/// error enum and the coarser status a control-surface caller actually
/// needs (spec.md §7's error table).
#[derive(Debug, Error)]
pub enum WalbError {
    #[error("device is in read-only mode")]
    ReadOnly,

    #[error("log device write failed: {0}")]
    LogIo(#[source] std::io::Error),

    #[error("data device write failed: {0}")]
    DataIo(#[source] std::io::Error),

    #[error("log ring buffer overflow (is_error_before_overflow is set)")]
    LogOverflow,

    #[error("device is frozen")]
    Frozen,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Wire(#[from] walb_wire::WireError),
}

pub type Result<T> = std::result::Result<T, WalbError>;
