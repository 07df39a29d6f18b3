// Re-export the proto module from the shared `api-shared` crate so callers
// can reference `api_grpc::service::pb`.
pub use api_shared::pb;

use crate::deadline::request_deadline;
use crate::status_from_transfer_error;
use api_shared::pb::file_service_server::FileService;
use api_shared::pb::{download_response, upload_request};
use dfs_core::{
    DeleteOutcome, DownloadMessage, DownloadSession, FileRecord, StorageService, TransferError,
    TransferResult, UploadMessage,
};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tonic::{Request, Response, Status, Streaming};

/// Download messages buffered ahead of the transport.
const DOWNLOAD_BUFFER: usize = 4;

pub type DownloadStream =
    Pin<Box<dyn Stream<Item = Result<pb::DownloadResponse, Status>> + Send + 'static>>;

/// gRPC facade over [`StorageService`]
#[derive(Clone)]
pub struct DfsService {
    storage: StorageService,
    transfer_timeout: Duration,
}

impl DfsService {
    /// `transfer_timeout` caps every upload and download, whatever deadline the client asks for.
    pub fn new(storage: StorageService, transfer_timeout: Duration) -> Self {
        Self {
            storage,
            transfer_timeout,
        }
    }
}

fn file_info(record: FileRecord) -> pb::FileInfo {
    pb::FileInfo {
        filename: record.filename,
        size: record.size,
        created_at: record.created_at.timestamp(),
        modified_at: record.modified_at.timestamp(),
    }
}

fn upload_message(req: pb::UploadRequest) -> TransferResult<UploadMessage> {
    match req.data {
        Some(upload_request::Data::Metadata(meta)) => Ok(UploadMessage::Metadata {
            filename: meta.filename,
            size: meta.size,
        }),
        Some(upload_request::Data::Chunk(bytes)) => Ok(UploadMessage::Chunk(bytes)),
        None => Err(TransferError::InvalidSequence("upload message carries no data")),
    }
}

fn to_download_response(message: DownloadMessage) -> pb::DownloadResponse {
    let data = match message {
        DownloadMessage::Metadata { filename, size } => {
            download_response::Data::Metadata(pb::FileMetadata { filename, size })
        }
        DownloadMessage::Chunk(bytes) => download_response::Data::Chunk(bytes),
    };
    pb::DownloadResponse { data: Some(data) }
}

/// Runs one download session, pushing each message into `tx` as the transport makes room.
///
/// An abnormal stop that the client cannot otherwise observe (the deadline) is reported
/// through `failure` before `tx` is dropped.
async fn pump_download(
    mut session: DownloadSession,
    tx: mpsc::Sender<Result<pb::DownloadResponse, Status>>,
    failure: oneshot::Sender<Status>,
    deadline: Instant,
    filename: String,
) {
    loop {
        let item = match session.next_message().await {
            Ok(Some(message)) => Ok(to_download_response(message)),
            Ok(None) => {
                tracing::debug!(%filename, "download complete");
                return;
            }
            Err(e) => {
                tracing::error!(%filename, "download failed mid-stream: {}", e);
                Err(status_from_transfer_error(&e))
            }
        };
        let is_error = item.is_err();

        match tokio::time::timeout_at(deadline, tx.send(item)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                tracing::debug!(%filename, "download receiver dropped");
                return;
            }
            Err(_) => {
                tracing::warn!(%filename, "download deadline exceeded");
                let _ = failure.send(status_from_transfer_error(&TransferError::DeadlineExceeded));
                return;
            }
        }

        if is_error {
            return;
        }
    }
}

/// Response stream fed by [`pump_download`].
fn outbound_stream(
    rx: mpsc::Receiver<Result<pb::DownloadResponse, Status>>,
    failure: oneshot::Receiver<Status>,
) -> DownloadStream {
    let stream = futures::stream::unfold((rx, Some(failure)), |(mut rx, mut failure)| async move {
        if let Some(item) = rx.recv().await {
            return Some((item, (rx, failure)));
        }
        let status = failure.take()?.try_recv().ok()?;
        Some((Err(status), (rx, None)))
    });
    Box::pin(stream)
}

#[tonic::async_trait]
impl FileService for DfsService {
    async fn upload(
        &self,
        req: Request<Streaming<pb::UploadRequest>>,
    ) -> Result<Response<pb::UploadResponse>, Status> {
        let deadline = request_deadline(req.metadata(), self.transfer_timeout);
        let inbound = req.into_inner().map(|item| match item {
            Ok(message) => upload_message(message),
            Err(status) => Err(TransferError::Transport(status.message().to_string())),
        });

        match self.storage.upload(inbound, deadline).await {
            Ok(record) => Ok(Response::new(pb::UploadResponse {
                success: true,
                message: format!("File '{}' uploaded successfully", record.filename),
                file_id: record.filename,
            })),
            Err(e) => {
                tracing::error!("Upload error: {}", e);
                Err(status_from_transfer_error(&e))
            }
        }
    }

    type DownloadStream = DownloadStream;

    async fn download(
        &self,
        req: Request<pb::DownloadRequest>,
    ) -> Result<Response<Self::DownloadStream>, Status> {
        let deadline = request_deadline(req.metadata(), self.transfer_timeout);
        let filename = req.into_inner().filename;

        let session = self.storage.download(&filename).await.map_err(|e| {
            tracing::error!(%filename, "Download error: {}", e);
            status_from_transfer_error(&e)
        })?;

        let (tx, rx) = mpsc::channel(DOWNLOAD_BUFFER);
        let (failure_tx, failure_rx) = oneshot::channel();
        tokio::spawn(pump_download(session, tx, failure_tx, deadline, filename));

        Ok(Response::new(outbound_stream(rx, failure_rx)))
    }

    async fn list(
        &self,
        req: Request<pb::ListRequest>,
    ) -> Result<Response<pb::ListResponse>, Status> {
        let prefix = req.into_inner().prefix;
        let files = self
            .storage
            .list(&prefix)
            .into_iter()
            .map(file_info)
            .collect();
        Ok(Response::new(pb::ListResponse { files }))
    }

    async fn delete(
        &self,
        req: Request<pb::DeleteRequest>,
    ) -> Result<Response<pb::DeleteResponse>, Status> {
        let filename = req.into_inner().filename;

        match self.storage.delete(&filename).await {
            Ok(DeleteOutcome::Deleted) => Ok(Response::new(pb::DeleteResponse {
                success: true,
                message: format!("File '{}' deleted successfully", filename),
            })),
            Ok(DeleteOutcome::NotFound) => Ok(Response::new(pb::DeleteResponse {
                success: false,
                message: format!("file not found: {}", filename),
            })),
            Err(e) => {
                tracing::error!(%filename, "Delete error: {}", e);
                Err(status_from_transfer_error(&e))
            }
        }
    }

    async fn stat(
        &self,
        req: Request<pb::StatRequest>,
    ) -> Result<Response<pb::StatResponse>, Status> {
        let filename = req.into_inner().filename;
        let file = self.storage.stat(&filename).map(file_info);
        Ok(Response::new(pb::StatResponse {
            exists: file.is_some(),
            file,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_core::CoreConfig;
    use futures::stream;
    use tempfile::TempDir;
    use tonic::Code;

    const CHUNK: usize = 8;

    fn service(temp: &TempDir) -> DfsService {
        let config =
            CoreConfig::new(temp.path().to_path_buf(), CHUNK, Duration::from_secs(30)).unwrap();
        let storage = StorageService::new(&config).unwrap();
        DfsService::new(storage, config.transfer_timeout())
    }

    async fn put(service: &DfsService, name: &str, bytes: &[u8]) {
        let mut messages = vec![Ok(UploadMessage::Metadata {
            filename: name.into(),
            size: bytes.len() as u64,
        })];
        messages.extend(bytes.chunks(3).map(|c| Ok(UploadMessage::Chunk(c.to_vec()))));
        service
            .storage
            .upload(
                stream::iter(messages),
                Instant::now() + Duration::from_secs(30),
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_upload_message_conversion() {
        let meta = pb::UploadRequest {
            data: Some(upload_request::Data::Metadata(pb::FileMetadata {
                filename: "a.txt".into(),
                size: 7,
            })),
        };
        assert_eq!(
            upload_message(meta).unwrap(),
            UploadMessage::Metadata {
                filename: "a.txt".into(),
                size: 7
            }
        );

        let chunk = pb::UploadRequest {
            data: Some(upload_request::Data::Chunk(vec![1, 2])),
        };
        assert_eq!(upload_message(chunk).unwrap(), UploadMessage::Chunk(vec![1, 2]));

        let empty = pb::UploadRequest { data: None };
        assert!(matches!(
            upload_message(empty),
            Err(TransferError::InvalidSequence(_))
        ));
    }

    #[tokio::test]
    async fn test_download_streams_metadata_then_chunks() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let bytes: Vec<u8> = (0..20).collect();
        put(&service, "data.bin", &bytes).await;

        let response = service
            .download(Request::new(pb::DownloadRequest {
                filename: "data.bin".into(),
            }))
            .await
            .unwrap();
        let messages: Vec<_> = response.into_inner().collect().await;

        let mut messages = messages.into_iter().map(|m| m.unwrap().data.unwrap());
        match messages.next() {
            Some(download_response::Data::Metadata(meta)) => {
                assert_eq!(meta.filename, "data.bin");
                assert_eq!(meta.size, 20);
            }
            other => panic!("expected metadata first, got {:?}", other),
        }

        let mut received = Vec::new();
        for data in messages {
            match data {
                download_response::Data::Chunk(chunk) => {
                    assert!(chunk.len() <= CHUNK);
                    received.extend(chunk);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(received, bytes);
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let result = service
            .download(Request::new(pb::DownloadRequest {
                filename: "missing.txt".into(),
            }))
            .await;

        let status = result.err().unwrap();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "file not found: missing.txt");
    }

    #[tokio::test]
    async fn test_outbound_stream_reports_failure_after_buffered_items() {
        let (tx, rx) = mpsc::channel(2);
        let (failure_tx, failure_rx) = oneshot::channel();
        tx.send(Ok(to_download_response(DownloadMessage::Chunk(vec![1]))))
            .await
            .unwrap();
        failure_tx.send(Status::deadline_exceeded("late")).unwrap();
        drop(tx);

        let items: Vec<_> = outbound_stream(rx, failure_rx).collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(
            items[1].as_ref().err().unwrap().code(),
            Code::DeadlineExceeded
        );
    }

    #[tokio::test]
    async fn test_list() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        put(&service, "a-1", b"one").await;
        put(&service, "a-2", b"two!").await;
        put(&service, "b-1", b"three").await;

        let all = service
            .list(Request::new(pb::ListRequest::default()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(all.files.len(), 3);

        let mut prefixed = service
            .list(Request::new(pb::ListRequest { prefix: "a-".into() }))
            .await
            .unwrap()
            .into_inner()
            .files;
        prefixed.sort_by(|x, y| x.filename.cmp(&y.filename));
        assert_eq!(prefixed.len(), 2);
        assert_eq!(prefixed[0].filename, "a-1");
        assert_eq!(prefixed[1].size, 4);
        assert!(prefixed[0].created_at > 0);

        let none = service
            .list(Request::new(pb::ListRequest { prefix: "zzz".into() }))
            .await
            .unwrap()
            .into_inner();
        assert!(none.files.is_empty());
    }

    #[tokio::test]
    async fn test_delete_soft_fails_on_missing() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        put(&service, "doomed", b"bye").await;

        let deleted = service
            .delete(Request::new(pb::DeleteRequest {
                filename: "doomed".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(deleted.success);
        assert_eq!(deleted.message, "File 'doomed' deleted successfully");

        let again = service
            .delete(Request::new(pb::DeleteRequest {
                filename: "doomed".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!again.success);
        assert_eq!(again.message, "file not found: doomed");
    }

    #[tokio::test]
    async fn test_stat() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        put(&service, "info.txt", b"12345").await;

        let found = service
            .stat(Request::new(pb::StatRequest {
                filename: "info.txt".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(found.exists);
        let file = found.file.unwrap();
        assert_eq!(file.filename, "info.txt");
        assert_eq!(file.size, 5);
        assert_eq!(file.created_at, file.modified_at);

        let missing = service
            .stat(Request::new(pb::StatRequest {
                filename: "nope".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!missing.exists);
        assert!(missing.file.is_none());
    }
}
