/// Errors from decoding or encoding on-disk WalB structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid physical block size {0} (must be 512 or 4096)")]
    InvalidPbs(u32),

    #[error("buffer too short: got {got} bytes, need {want}")]
    ShortBuffer { got: usize, want: usize },

    #[error("header holds {got} records, but capacity is {capacity}")]
    TooManyRecords { got: usize, capacity: usize },

    #[error("bad sector type {0:#x}, expected a logpack header")]
    BadSectorType(u32),

    #[error("bad superblock magic {0:#x}")]
    BadMagic(u32),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}
