use thiserror::Error;

pub type ZipResult<T> = Result<T, SplitZipError>;

#[derive(Debug, Error)]
pub enum SplitZipError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Volume I/O error")]
    Volume(#[from] std::io::Error),

    #[error("Split size {split_size} bytes is too small (minimum required: {min_required})")]
    VolumeTooSmall { split_size: u64, min_required: u64 },

    #[error("Unsafe archive path: {0:?}")]
    UnsafePath(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("CRC32 mismatch for {name:?}: expected {expected:08x}, got {actual:08x}")]
    Integrity {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("Zip32 limit exceeded: {0}")]
    Overflow(&'static str),

    /// The archive was finalized; no further members can be added.
    #[error("Archive is already closed")]
    Closed,

    /// A previous write failed partway through an entry. The partial volumes
    /// on disk cannot be turned into a valid archive.
    #[error("Archive was aborted after a failed write")]
    Aborted,
}
