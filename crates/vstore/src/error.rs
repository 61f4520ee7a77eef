use thiserror::Error;

/// The single error taxonomy for the virtual storage layer.
///
/// `NotFound` exists in this enum for backends to signal absence across
/// internal call boundaries, but the public `RootStorage`/`Backend` API
/// never surfaces it as an `Err` — lookup and load report absence as
/// `Ok(None)`, and `remove` swallows it as a silent no-op.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed path: {0}")]
    PathSyntax(String),

    #[error("not found")]
    NotFound,

    #[error("read-only: {0}")]
    ReadOnly(String),

    #[error("unsupported type for store: {0}")]
    UnsupportedType(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("mount conflict: {0}")]
    MountConflict(String),

    #[error("no writable storage for path")]
    NoWritableStorage,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::UnsupportedFormat(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
