//! Storage coordination.
//!
//! [`StorageService`] owns the metadata store and the blob store and is the only component that
//! touches both. Every operation orders its two steps so that a failure between them leaves a
//! detectable state: uploads write bytes before the record, deletes remove bytes before the
//! record.

use crate::transfer::Reservations;
use crate::{
    CoreConfig, CoreResult, DownloadSession, FileRecord, InMemoryMetadataStore, MetadataError,
    MetadataStore, TransferError, TransferResult, UploadMessage, UploadSession,
};
use dfs_files::BlobStore;
use dfs_types::Filename;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;

/// Result of a delete request. Absence is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// File operations over metadata and blob storage - no API concerns
#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<BlobStore>,
    reservations: Reservations,
    chunk_size: usize,
}

impl StorageService {
    /// Creates a service with an empty in-memory metadata store.
    ///
    /// # Errors
    /// Returns `CoreError::Storage` if the data directory cannot be prepared.
    pub fn new(config: &CoreConfig) -> CoreResult<Self> {
        Self::with_store(config, Arc::new(InMemoryMetadataStore::new()))
    }

    /// Creates a service over a caller-supplied metadata store.
    pub fn with_store(config: &CoreConfig, store: Arc<dyn MetadataStore>) -> CoreResult<Self> {
        let blobs = BlobStore::new(config.data_dir())?;
        Ok(Self {
            store,
            blobs: Arc::new(blobs),
            reservations: Reservations::default(),
            chunk_size: config.chunk_size(),
        })
    }

    /// Starts a new upload in `AwaitingMetadata`.
    pub fn start_upload(&self) -> UploadSession {
        UploadSession::new(
            Arc::clone(&self.store),
            Arc::clone(&self.blobs),
            self.reservations.clone(),
        )
    }

    /// Drives an upload to completion from an inbound message stream.
    ///
    /// Each wait for the next message is bounded by `deadline`. The stream ending normally
    /// commits the upload; an error item, a protocol violation or the deadline aborts it and
    /// removes any partial blob.
    pub async fn upload<S>(&self, messages: S, deadline: Instant) -> TransferResult<FileRecord>
    where
        S: Stream<Item = TransferResult<UploadMessage>>,
    {
        let mut messages = std::pin::pin!(messages);
        let mut session = self.start_upload();

        loop {
            let next = match tokio::time::timeout_at(deadline, messages.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(
                        received = session.bytes_received(),
                        "upload deadline exceeded"
                    );
                    session.abort().await;
                    return Err(TransferError::DeadlineExceeded);
                }
            };

            match next {
                Some(Ok(message)) => session.apply(message).await?,
                Some(Err(e)) => {
                    tracing::warn!(received = session.bytes_received(), "upload interrupted: {}", e);
                    session.abort().await;
                    return Err(e);
                }
                None => return session.finish().await,
            }
        }
    }

    /// Looks up `filename` and opens its blob for streaming.
    pub async fn download(&self, filename: &str) -> TransferResult<DownloadSession> {
        DownloadSession::open(self.store.as_ref(), &self.blobs, filename, self.chunk_size).await
    }

    /// Records whose filename starts with `prefix`, in no particular order.
    pub fn list(&self, prefix: &str) -> Vec<FileRecord> {
        self.store.list(prefix)
    }

    /// The record for `filename`, or `None` if it does not exist.
    pub fn stat(&self, filename: &str) -> Option<FileRecord> {
        match self.store.get(filename) {
            Ok(record) => Some(record),
            Err(MetadataError::NotFound(_)) => None,
            Err(e) => {
                tracing::warn!(filename, "stat failed: {}", e);
                None
            }
        }
    }

    /// Removes a file's blob and then its record.
    ///
    /// A blob that is already gone is not an error. If the record disappears between the
    /// presence check and removal (a concurrent delete), the outcome is `NotFound`.
    pub async fn delete(&self, filename: &str) -> TransferResult<DeleteOutcome> {
        if !self.store.exists(filename) {
            return Ok(DeleteOutcome::NotFound);
        }

        let name = Filename::parse(filename)?;
        if !self.blobs.delete(&name).await? {
            tracing::warn!(%name, "blob already absent during delete");
        }

        match self.store.delete(filename) {
            Ok(()) => {
                tracing::info!(%name, "file deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(MetadataError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
