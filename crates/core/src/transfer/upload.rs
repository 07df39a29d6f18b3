use super::{Reservation, Reservations};
use crate::{FileRecord, MetadataStore, TransferError, TransferResult};
use dfs_files::{BlobStore, BlobWriter};
use dfs_types::Filename;
use std::sync::Arc;

/// One inbound message on an upload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMessage {
    /// Must be the first message. `size` is the sender's declared size, used only for its own
    /// progress reporting.
    Metadata { filename: String, size: u64 },
    Chunk(Vec<u8>),
}

/// Observable position of an [`UploadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    AwaitingMetadata,
    ReceivingChunks,
    Finalizing,
    Committed,
    Aborted,
}

/// Everything an upload holds once its metadata has been accepted.
struct ActiveUpload {
    filename: Filename,
    declared_size: u64,
    writer: BlobWriter,
    _reservation: Reservation,
}

impl ActiveUpload {
    async fn abort(self) {
        if let Err(e) = self.writer.discard().await {
            tracing::warn!(filename = %self.filename, "failed to discard partial upload: {}", e);
        }
    }
}

enum UploadState {
    AwaitingMetadata,
    ReceivingChunks(ActiveUpload),
    Finalizing,
    Committed,
    Aborted,
}

/// Server side of one upload stream.
///
/// Feed each inbound message to [`UploadSession::apply`], then call [`UploadSession::finish`] at
/// end-of-stream or [`UploadSession::abort`] on a transport failure. Any error moves the session
/// to `Aborted` after deleting the partial blob; no record is created unless the session reaches
/// `Committed`.
pub struct UploadSession {
    state: UploadState,
    store: Arc<dyn MetadataStore>,
    blobs: Arc<BlobStore>,
    reservations: Reservations,
}

impl UploadSession {
    pub(crate) fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<BlobStore>,
        reservations: Reservations,
    ) -> Self {
        Self {
            state: UploadState::AwaitingMetadata,
            store,
            blobs,
            reservations,
        }
    }

    pub fn phase(&self) -> UploadPhase {
        match self.state {
            UploadState::AwaitingMetadata => UploadPhase::AwaitingMetadata,
            UploadState::ReceivingChunks(_) => UploadPhase::ReceivingChunks,
            UploadState::Finalizing => UploadPhase::Finalizing,
            UploadState::Committed => UploadPhase::Committed,
            UploadState::Aborted => UploadPhase::Aborted,
        }
    }

    /// Bytes written to the backing blob so far.
    pub fn bytes_received(&self) -> u64 {
        match &self.state {
            UploadState::ReceivingChunks(active) => active.writer.bytes_written(),
            _ => 0,
        }
    }

    /// Advances the session by one inbound message.
    pub async fn apply(&mut self, message: UploadMessage) -> TransferResult<()> {
        let state = std::mem::replace(&mut self.state, UploadState::Aborted);

        let next = match (state, message) {
            (UploadState::AwaitingMetadata, UploadMessage::Metadata { filename, size }) => {
                self.begin(filename, size).await?
            }
            (UploadState::AwaitingMetadata, UploadMessage::Chunk(_)) => {
                return Err(TransferError::InvalidSequence("received chunk before metadata"));
            }
            (UploadState::ReceivingChunks(mut active), UploadMessage::Chunk(bytes)) => {
                if let Err(e) = active.writer.append(&bytes).await {
                    tracing::error!(filename = %active.filename, "failed to write chunk: {}", e);
                    active.abort().await;
                    return Err(e.into());
                }
                UploadState::ReceivingChunks(active)
            }
            (UploadState::ReceivingChunks(active), UploadMessage::Metadata { .. }) => {
                active.abort().await;
                return Err(TransferError::InvalidSequence("received metadata twice"));
            }
            (finished, _) => {
                self.state = finished;
                return Err(TransferError::InvalidSequence("upload already finished"));
            }
        };

        self.state = next;
        Ok(())
    }

    async fn begin(&self, filename: String, declared_size: u64) -> TransferResult<UploadState> {
        let filename = Filename::parse(&filename)?;

        // Reserve before checking the store. A committing upload holds its reservation until its
        // record exists, so once ours is granted the presence check cannot go stale.
        let reservation = self
            .reservations
            .try_reserve(filename.as_str())
            .ok_or_else(|| TransferError::AlreadyExists(filename.to_string()))?;
        if self.store.exists(filename.as_str()) {
            return Err(TransferError::AlreadyExists(filename.into_inner()));
        }

        let writer = self.blobs.create(&filename).await?;
        tracing::debug!(%filename, declared_size, "upload started");

        Ok(UploadState::ReceivingChunks(ActiveUpload {
            filename,
            declared_size,
            writer,
            _reservation: reservation,
        }))
    }

    /// Completes the upload at end-of-stream.
    ///
    /// Persists the blob, then records its metadata. If the record cannot be created the blob
    /// is deleted again before the error is returned.
    pub async fn finish(&mut self) -> TransferResult<FileRecord> {
        let active = match std::mem::replace(&mut self.state, UploadState::Finalizing) {
            UploadState::ReceivingChunks(active) => active,
            UploadState::AwaitingMetadata => {
                self.state = UploadState::Aborted;
                return Err(TransferError::InvalidSequence("stream ended before metadata"));
            }
            finished => {
                self.state = finished;
                return Err(TransferError::InvalidSequence("upload already finished"));
            }
        };

        let ActiveUpload {
            filename,
            declared_size,
            writer,
            _reservation,
        } = active;

        let size = match writer.persist().await {
            Ok(size) => size,
            Err(e) => {
                self.state = UploadState::Aborted;
                return Err(e.into());
            }
        };

        if size != declared_size {
            tracing::warn!(
                %filename,
                declared_size,
                size,
                "declared size differs from bytes received"
            );
        }

        match self.store.create(FileRecord::new(filename.as_str(), size)) {
            Ok(record) => {
                self.state = UploadState::Committed;
                tracing::info!(%filename, size, "upload committed");
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&filename).await {
                    tracing::warn!(%filename, "failed to remove blob after metadata error: {}", cleanup);
                }
                self.state = UploadState::Aborted;
                Err(e.into())
            }
        }
    }

    /// Abandons the upload, deleting any partial blob.
    pub async fn abort(&mut self) {
        if let UploadState::ReceivingChunks(active) =
            std::mem::replace(&mut self.state, UploadState::Aborted)
        {
            tracing::debug!(filename = %active.filename, "upload aborted");
            active.abort().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryMetadataStore, MetadataError};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: Arc<InMemoryMetadataStore>,
        blobs: Arc<BlobStore>,
        reservations: Reservations,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let blobs = Arc::new(BlobStore::new(temp.path()).unwrap());
            Self {
                _temp: temp,
                store: Arc::new(InMemoryMetadataStore::new()),
                blobs,
                reservations: Reservations::default(),
            }
        }

        fn session(&self) -> UploadSession {
            UploadSession::new(
                self.store.clone(),
                self.blobs.clone(),
                self.reservations.clone(),
            )
        }

        fn staging_is_empty(&self) -> bool {
            std::fs::read_dir(self.blobs.staging_dir()).unwrap().next().is_none()
        }
    }

    fn metadata(name: &str, size: u64) -> UploadMessage {
        UploadMessage::Metadata {
            filename: name.into(),
            size,
        }
    }

    #[tokio::test]
    async fn test_phases_through_commit() {
        let fx = Fixture::new();
        let mut session = fx.session();
        assert_eq!(session.phase(), UploadPhase::AwaitingMetadata);

        session.apply(metadata("a.txt", 5)).await.unwrap();
        assert_eq!(session.phase(), UploadPhase::ReceivingChunks);

        session.apply(UploadMessage::Chunk(b"he".to_vec())).await.unwrap();
        session.apply(UploadMessage::Chunk(b"llo".to_vec())).await.unwrap();
        assert_eq!(session.bytes_received(), 5);

        let record = session.finish().await.unwrap();
        assert_eq!(session.phase(), UploadPhase::Committed);
        assert_eq!(record.filename, "a.txt");
        assert_eq!(record.size, 5);
        assert_eq!(fx.store.get("a.txt").unwrap(), record);
        assert!(fx.staging_is_empty());
        assert!(!fx.reservations.is_reserved("a.txt"));
    }

    #[tokio::test]
    async fn test_size_is_bytes_written_not_declared() {
        let fx = Fixture::new();
        let mut session = fx.session();

        session.apply(metadata("a.txt", 1000)).await.unwrap();
        session.apply(UploadMessage::Chunk(vec![7; 3])).await.unwrap();
        let record = session.finish().await.unwrap();

        assert_eq!(record.size, 3);
    }

    #[tokio::test]
    async fn test_chunk_before_metadata() {
        let fx = Fixture::new();
        let mut session = fx.session();

        let result = session.apply(UploadMessage::Chunk(vec![1])).await;

        assert!(matches!(result, Err(TransferError::InvalidSequence(_))));
        assert_eq!(session.phase(), UploadPhase::Aborted);
    }

    #[tokio::test]
    async fn test_second_metadata_aborts_and_cleans_up() {
        let fx = Fixture::new();
        let mut session = fx.session();

        session.apply(metadata("a.txt", 1)).await.unwrap();
        session.apply(UploadMessage::Chunk(vec![1])).await.unwrap();
        let result = session.apply(metadata("b.txt", 1)).await;

        assert!(matches!(result, Err(TransferError::InvalidSequence(_))));
        assert_eq!(session.phase(), UploadPhase::Aborted);
        assert!(fx.staging_is_empty());
        assert!(!fx.reservations.is_reserved("a.txt"));
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_end_of_stream_before_metadata() {
        let fx = Fixture::new();
        let mut session = fx.session();

        let result = session.finish().await;

        assert!(matches!(result, Err(TransferError::InvalidSequence(_))));
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_filename_rejected_before_any_write() {
        let fx = Fixture::new();
        let mut session = fx.session();

        let result = session.apply(metadata("../escape", 1)).await;

        assert!(matches!(result, Err(TransferError::InvalidFilename(_))));
        assert!(fx.staging_is_empty());
    }

    #[tokio::test]
    async fn test_existing_record_rejected_and_blob_untouched() {
        let fx = Fixture::new();
        let mut first = fx.session();
        first.apply(metadata("a.txt", 3)).await.unwrap();
        first.apply(UploadMessage::Chunk(b"old".to_vec())).await.unwrap();
        first.finish().await.unwrap();

        let mut second = fx.session();
        let result = second.apply(metadata("a.txt", 3)).await;

        assert!(matches!(result, Err(TransferError::AlreadyExists(_))));
        let name = Filename::parse("a.txt").unwrap();
        let mut reader = fx.blobs.open(&name).await.unwrap();
        assert_eq!(reader.read_chunk(16).await.unwrap().unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_concurrent_upload_of_same_name_rejected() {
        let fx = Fixture::new();
        let mut first = fx.session();
        let mut second = fx.session();

        first.apply(metadata("a.txt", 1)).await.unwrap();
        let result = second.apply(metadata("a.txt", 1)).await;
        assert!(matches!(result, Err(TransferError::AlreadyExists(_))));

        first.apply(UploadMessage::Chunk(vec![9])).await.unwrap();
        let record = first.finish().await.unwrap();
        assert_eq!(record.size, 1);
    }

    #[tokio::test]
    async fn test_abort_removes_partial_blob() {
        let fx = Fixture::new();
        let mut session = fx.session();

        session.apply(metadata("a.txt", 10)).await.unwrap();
        session.apply(UploadMessage::Chunk(vec![1; 4])).await.unwrap();
        session.abort().await;

        assert_eq!(session.phase(), UploadPhase::Aborted);
        assert!(fx.staging_is_empty());
        assert!(!fx.blobs.exists(&Filename::parse("a.txt").unwrap()).await);
        assert!(!fx.reservations.is_reserved("a.txt"));
    }

    #[tokio::test]
    async fn test_dropped_session_releases_everything() {
        let fx = Fixture::new();
        {
            let mut session = fx.session();
            session.apply(metadata("a.txt", 10)).await.unwrap();
            session.apply(UploadMessage::Chunk(vec![1; 4])).await.unwrap();
        }

        assert!(fx.staging_is_empty());
        assert!(!fx.reservations.is_reserved("a.txt"));
    }

    #[tokio::test]
    async fn test_messages_after_commit_rejected() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.apply(metadata("a.txt", 0)).await.unwrap();
        session.finish().await.unwrap();

        let result = session.apply(UploadMessage::Chunk(vec![1])).await;

        assert!(matches!(result, Err(TransferError::InvalidSequence(_))));
        assert_eq!(session.phase(), UploadPhase::Committed);
        assert_eq!(fx.store.get("a.txt").unwrap().size, 0);
    }

    type Hook = Box<dyn FnOnce() + Send>;

    /// In-memory store that runs a one-shot hook inside the next `exists` call, after the
    /// answer has been computed.
    struct HookStore {
        inner: InMemoryMetadataStore,
        on_exists: parking_lot::Mutex<Option<Hook>>,
    }

    impl HookStore {
        fn run_pending_hook(&self) {
            let hook = self.on_exists.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    impl MetadataStore for HookStore {
        fn create(&self, record: FileRecord) -> crate::MetadataResult<FileRecord> {
            self.inner.create(record)
        }
        fn get(&self, filename: &str) -> crate::MetadataResult<FileRecord> {
            self.inner.get(filename)
        }
        fn update(&self, record: FileRecord) -> crate::MetadataResult<FileRecord> {
            self.inner.update(record)
        }
        fn delete(&self, filename: &str) -> crate::MetadataResult<()> {
            self.inner.delete(filename)
        }
        fn list(&self, prefix: &str) -> Vec<FileRecord> {
            self.inner.list(prefix)
        }
        fn exists(&self, filename: &str) -> bool {
            let present = self.inner.exists(filename);
            self.run_pending_hook();
            present
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_commit_during_admission_check_keeps_committed_blob() {
        let fx = Fixture::new();
        let store = Arc::new(HookStore {
            inner: InMemoryMetadataStore::new(),
            on_exists: parking_lot::Mutex::new(None),
        });
        let session = || {
            UploadSession::new(
                store.clone() as Arc<dyn MetadataStore>,
                fx.blobs.clone(),
                fx.reservations.clone(),
            )
        };

        let mut first = session();
        first.apply(metadata("a.txt", 5)).await.unwrap();
        first.apply(UploadMessage::Chunk(b"first".to_vec())).await.unwrap();

        // The first upload commits while the second is being admitted.
        *store.on_exists.lock() = Some(Box::new(move || {
            futures::executor::block_on(first.finish()).unwrap();
        }));

        let mut second = session();
        let admitted = second.apply(metadata("a.txt", 6)).await;
        let second_result = match admitted {
            Ok(()) => {
                second.apply(UploadMessage::Chunk(b"second".to_vec())).await.unwrap();
                second.finish().await.map(|_| ())
            }
            Err(e) => Err(e),
        };
        store.run_pending_hook();

        assert!(matches!(second_result, Err(TransferError::AlreadyExists(_))));
        let record = store.get("a.txt").unwrap();
        assert_eq!(record.size, 5);
        let name = Filename::parse("a.txt").unwrap();
        let mut reader = fx.blobs.open(&name).await.unwrap();
        assert_eq!(reader.read_chunk(16).await.unwrap().unwrap(), b"first");
        assert!(!fx.reservations.is_reserved("a.txt"));
    }

    #[tokio::test]
    async fn test_reservation_released_when_record_already_exists() {
        let fx = Fixture::new();
        fx.store.create(FileRecord::new("a.txt", 1)).unwrap();
        let mut session = fx.session();

        let result = session.apply(metadata("a.txt", 1)).await;

        assert!(matches!(result, Err(TransferError::AlreadyExists(_))));
        assert!(!fx.reservations.is_reserved("a.txt"));
        assert!(fx.staging_is_empty());
    }

    /// Store that accepts nothing, to exercise cleanup after the data phase.
    struct RejectingStore;

    impl MetadataStore for RejectingStore {
        fn create(&self, record: FileRecord) -> crate::MetadataResult<FileRecord> {
            Err(MetadataError::AlreadyExists(record.filename))
        }
        fn get(&self, filename: &str) -> crate::MetadataResult<FileRecord> {
            Err(MetadataError::NotFound(filename.into()))
        }
        fn update(&self, record: FileRecord) -> crate::MetadataResult<FileRecord> {
            Err(MetadataError::NotFound(record.filename))
        }
        fn delete(&self, filename: &str) -> crate::MetadataResult<()> {
            Err(MetadataError::NotFound(filename.into()))
        }
        fn list(&self, _prefix: &str) -> Vec<FileRecord> {
            Vec::new()
        }
        fn exists(&self, _filename: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_create_failure_after_data_phase_deletes_blob() {
        let fx = Fixture::new();
        let mut session = UploadSession::new(
            Arc::new(RejectingStore),
            fx.blobs.clone(),
            fx.reservations.clone(),
        );

        session.apply(metadata("a.txt", 3)).await.unwrap();
        session.apply(UploadMessage::Chunk(b"abc".to_vec())).await.unwrap();
        let result = session.finish().await;

        assert!(matches!(result, Err(TransferError::AlreadyExists(_))));
        assert_eq!(session.phase(), UploadPhase::Aborted);
        assert!(!fx.blobs.exists(&Filename::parse("a.txt").unwrap()).await);
        assert!(fx.staging_is_empty());
    }
}
