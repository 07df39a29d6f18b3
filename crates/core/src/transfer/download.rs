use crate::{FileRecord, MetadataStore, TransferError, TransferResult};
use dfs_files::{BlobReader, BlobStore};
use dfs_types::Filename;

/// One outbound message on a download stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadMessage {
    Metadata { filename: String, size: u64 },
    Chunk(Vec<u8>),
}

/// Observable position of a [`DownloadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    SendingMetadata,
    SendingChunks,
    Done,
}

enum DownloadState {
    SendingMetadata { record: FileRecord, reader: BlobReader },
    SendingChunks { reader: BlobReader },
    Done,
}

/// Server side of one download stream.
///
/// Created only after the lookup succeeds and the blob is open, so a missing file is reported
/// before any message is produced. Downloads never mutate state, so an early stop needs no
/// cleanup beyond dropping the session.
pub struct DownloadSession {
    state: DownloadState,
    chunk_size: usize,
}

impl DownloadSession {
    /// Resolves `filename` and opens its blob.
    pub(crate) async fn open(
        store: &dyn MetadataStore,
        blobs: &BlobStore,
        filename: &str,
        chunk_size: usize,
    ) -> TransferResult<Self> {
        let record = store.get(filename)?;

        let name = Filename::parse(&record.filename)?;
        let reader = blobs.open(&name).await.map_err(|e| {
            tracing::error!(filename = %name, "failed to open blob for download: {}", e);
            TransferError::from(e)
        })?;

        Ok(Self {
            state: DownloadState::SendingMetadata { record, reader },
            chunk_size,
        })
    }

    pub fn phase(&self) -> DownloadPhase {
        match self.state {
            DownloadState::SendingMetadata { .. } => DownloadPhase::SendingMetadata,
            DownloadState::SendingChunks { .. } => DownloadPhase::SendingChunks,
            DownloadState::Done => DownloadPhase::Done,
        }
    }

    /// Produces the next outbound message, or `None` once the blob has been fully sent.
    pub async fn next_message(&mut self) -> TransferResult<Option<DownloadMessage>> {
        match std::mem::replace(&mut self.state, DownloadState::Done) {
            DownloadState::SendingMetadata { record, reader } => {
                self.state = DownloadState::SendingChunks { reader };
                Ok(Some(DownloadMessage::Metadata {
                    filename: record.filename,
                    size: record.size,
                }))
            }
            DownloadState::SendingChunks { mut reader } => {
                match reader.read_chunk(self.chunk_size).await? {
                    Some(chunk) => {
                        self.state = DownloadState::SendingChunks { reader };
                        Ok(Some(DownloadMessage::Chunk(chunk)))
                    }
                    None => Ok(None),
                }
            }
            DownloadState::Done => Ok(None),
        }
    }
}
