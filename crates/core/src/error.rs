use dfs_files::FilesError;
use dfs_types::FilenameError;

/// Errors returned by a [`crate::MetadataStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    #[error("file not found: {0}")]
    NotFound(String),
}

pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Errors that abort an upload, download or delete.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid sequence: {0}")]
    InvalidSequence(&'static str),
    #[error(transparent)]
    InvalidFilename(#[from] FilenameError),
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Io(#[from] FilesError),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<MetadataError> for TransferError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::AlreadyExists(name) => TransferError::AlreadyExists(name),
            MetadataError::NotFound(name) => TransferError::NotFound(name),
        }
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Errors raised while assembling core services at startup.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to initialise storage: {0}")]
    Storage(#[from] FilesError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
