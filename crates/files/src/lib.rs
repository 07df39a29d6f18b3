//! DFS Blob Storage
//!
//! This crate provides the byte-oriented storage backend for the DFS file service. Each stored
//! file is one *blob*, addressed by its validated [`Filename`] in a flat namespace.
//!
//! ## Write Model
//!
//! Writes never touch a committed blob directly. A [`BlobWriter`] appends into a private staging
//! file and only [`BlobWriter::persist`] moves it into place with an atomic rename. A writer that
//! is dropped or discarded removes its staging file, so an interrupted transfer leaves nothing
//! behind.
//!
//! ```text
//! <root>/
//! ├── blobs/
//! │   └── report.pdf
//! └── staging/
//!     └── 7.part   # removed on persist, discard, drop or restart
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use dfs_files::BlobStore;
//! use dfs_types::Filename;
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = BlobStore::new(Path::new("data"))?;
//! let name = Filename::parse("hello.txt")?;
//!
//! let mut writer = store.create(&name).await?;
//! writer.append(b"hello").await?;
//! let size = writer.persist().await?;
//! assert_eq!(size, 5);
//! # Ok(())
//! # }
//! ```

mod blobs;
mod constants;

pub use blobs::{BlobReader, BlobStore, BlobWriter};
pub use constants::{BLOBS_DIR_NAME, STAGING_DIR_NAME};
pub use dfs_types::Filename;

/// Errors that can occur during blob operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory could not be created or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilesError {
    /// Returns true when the underlying I/O error is `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FilesError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
