//! Local-filesystem blob store
//!
//! [`BlobStore`] maps each [`Filename`] onto `<root>/blobs/<filename>`. It performs no locking of
//! its own: callers that need exclusive ownership of a name must coordinate above this layer.
//!
//! # Implementation Notes
//!
//! - Directory bootstrapping happens once, in [`BlobStore::new`]
//! - Every writer gets a unique staging path, so two writers for the same name never share bytes
//! - Staging paths are `<id>.part`, independent of the filename's length
//! - Staging contents never survive a restart: [`BlobStore::new`] empties `staging/`
//! - Persisting is `flush` + `fsync` + `rename`; the rename replaces any stale blob of that name
//! - Dropping an unpersisted writer removes its staging file synchronously

use crate::constants::{BLOBS_DIR_NAME, STAGING_DIR_NAME, STAGING_SUFFIX};
use crate::FilesError;
use dfs_types::Filename;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Wraps an I/O error with a description of the operation and path involved.
fn io_context(e: std::io::Error, action: &str, path: &Path) -> FilesError {
    FilesError::Io(std::io::Error::new(
        e.kind(),
        format!("Failed to {} {}: {}", action, path.display(), e),
    ))
}

/// Removes leftovers from writers that never ran `Drop` (a crash or kill).
///
/// Staging ids restart at zero, so a stale file would collide with a fresh writer.
fn clear_staging(staging_dir: &Path) -> Result<(), FilesError> {
    let entries = std::fs::read_dir(staging_dir)
        .map_err(|e| io_context(e, "read staging directory", staging_dir))?;

    let mut removed = 0usize;
    for entry in entries {
        let path = entry
            .map_err(|e| io_context(e, "read staging directory", staging_dir))?
            .path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| io_context(e, "remove stale staging entry", &path))?;
        removed += 1;
    }

    if removed > 0 {
        tracing::warn!(removed, dir = %staging_dir.display(), "removed stale staging files");
    }
    Ok(())
}

/// Byte storage addressed by filename
#[derive(Debug)]
pub struct BlobStore {
    /// Directory holding committed blobs
    blobs_dir: PathBuf,

    /// Directory holding in-flight writes
    staging_dir: PathBuf,

    /// Source of unique staging-file suffixes
    next_staging_id: AtomicU64,
}

impl BlobStore {
    /// Opens (creating if needed) a blob store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if `root` exists but is not a directory, or if
    /// the `blobs/` and `staging/` directories cannot be created.
    pub fn new(root: &Path) -> Result<Self, FilesError> {
        if root.exists() && !root.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let blobs_dir = root.join(BLOBS_DIR_NAME);
        let staging_dir = root.join(STAGING_DIR_NAME);
        for dir in [&blobs_dir, &staging_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                FilesError::InvalidRootDirectory(format!(
                    "Cannot create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        clear_staging(&staging_dir)?;

        Ok(Self {
            blobs_dir,
            staging_dir,
            next_staging_id: AtomicU64::new(0),
        })
    }

    /// Opens a new, empty staging file for `filename`.
    ///
    /// The committed blob (if any) is untouched until [`BlobWriter::persist`] succeeds.
    pub async fn create(&self, filename: &Filename) -> Result<BlobWriter, FilesError> {
        let id = self.next_staging_id.fetch_add(1, Ordering::Relaxed);
        let staging_path = self
            .staging_dir
            .join(format!("{}.{}", id, STAGING_SUFFIX));

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging_path)
            .await
            .map_err(|e| io_context(e, "create staging file", &staging_path))?;

        Ok(BlobWriter {
            file: Some(file),
            staging_path,
            blob_path: self.blob_path(filename),
            bytes_written: 0,
            persisted: false,
        })
    }

    /// Opens the committed blob for `filename` for sequential reading.
    pub async fn open(&self, filename: &Filename) -> Result<BlobReader, FilesError> {
        let path = self.blob_path(filename);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| io_context(e, "open blob", &path))?;
        Ok(BlobReader { file })
    }

    /// Deletes the committed blob for `filename`.
    ///
    /// Returns `Ok(false)` if there was nothing to delete.
    pub async fn delete(&self, filename: &Filename) -> Result<bool, FilesError> {
        let path = self.blob_path(filename);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_context(e, "delete blob", &path)),
        }
    }

    /// Returns true if a committed blob exists for `filename`.
    pub async fn exists(&self, filename: &Filename) -> bool {
        fs::try_exists(self.blob_path(filename))
            .await
            .unwrap_or(false)
    }

    /// Returns the directory holding in-flight writes.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn blob_path(&self, filename: &Filename) -> PathBuf {
        self.blobs_dir.join(filename.as_str())
    }
}

/// An in-flight write of one blob
///
/// Bytes land in a private staging file. Nothing is visible under the blob's name until
/// [`BlobWriter::persist`] returns.
#[derive(Debug)]
pub struct BlobWriter {
    file: Option<fs::File>,
    staging_path: PathBuf,
    blob_path: PathBuf,
    bytes_written: u64,
    persisted: bool,
}

impl BlobWriter {
    /// Appends `bytes` to the staging file.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), FilesError> {
        let file = self.file.as_mut().ok_or_else(|| {
            FilesError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "blob writer is closed",
            ))
        })?;
        file.write_all(bytes)
            .await
            .map_err(|e| io_context(e, "write staging file", &self.staging_path))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Total bytes appended so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes, syncs and atomically moves the staging file into place.
    ///
    /// Returns the number of bytes in the committed blob. On error the staging file is removed
    /// when the writer drops.
    pub async fn persist(mut self) -> Result<u64, FilesError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| io_context(e, "flush staging file", &self.staging_path))?;
            file.sync_all()
                .await
                .map_err(|e| io_context(e, "sync staging file", &self.staging_path))?;
        }

        fs::rename(&self.staging_path, &self.blob_path)
            .await
            .map_err(|e| io_context(e, "commit blob", &self.blob_path))?;
        self.persisted = true;

        Ok(self.bytes_written)
    }

    /// Closes and removes the staging file.
    pub async fn discard(mut self) -> Result<(), FilesError> {
        self.file.take();
        let result = match fs::remove_file(&self.staging_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_context(e, "remove staging file", &self.staging_path)),
        };
        // Nothing left for Drop to clean up either way.
        self.persisted = true;
        result
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.staging_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.staging_path.display(),
                "failed to remove abandoned staging file: {}",
                e
            ),
        }
    }
}

/// Sequential reader over one committed blob
#[derive(Debug)]
pub struct BlobReader {
    file: fs::File,
}

impl BlobReader {
    /// Reads the next chunk of at most `max_len` bytes.
    ///
    /// Short reads from the OS are retried so every chunk except the last is exactly `max_len`
    /// bytes. Returns `None` once the end of the blob is reached.
    pub async fn read_chunk(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, FilesError> {
        let mut buf = vec![0u8; max_len];
        let mut filled = 0;
        while filled < max_len {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}
