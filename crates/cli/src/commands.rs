use crate::output::{self, OutputFormat};
use anyhow::{anyhow, bail, Context};
use api_shared::pb::file_service_client::FileServiceClient;
use api_shared::pb::{self, download_response, upload_request};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tonic::codec::Streaming;
use tonic::transport::Channel;
use tonic::{Request, Status};

/// Bytes per upload chunk.
const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// Upload messages buffered ahead of the transport.
const UPLOAD_BUFFER: usize = 4;

const BAR_TEMPLATE: &str =
    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

fn rpc_error(action: &str, status: Status) -> anyhow::Error {
    anyhow!("{}: {} ({:?})", action, status.message(), status.code())
}

/// A connected client plus the settings every command shares.
pub struct Session {
    client: FileServiceClient<Channel>,
    timeout: Duration,
    format: OutputFormat,
}

impl Session {
    /// Connects to `server`, adding an `http://` scheme when none is given.
    pub async fn connect(
        server: &str,
        timeout: Duration,
        format: OutputFormat,
    ) -> anyhow::Result<Self> {
        let endpoint = if server.contains("://") {
            server.to_string()
        } else {
            format!("http://{}", server)
        };

        let client = FileServiceClient::connect(endpoint.clone())
            .await
            .with_context(|| format!("failed to connect to server {}", endpoint))?;

        Ok(Self {
            client,
            timeout,
            format,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request.set_timeout(self.timeout);
        request
    }

    fn transfer_bar(&self, total: u64, label: &'static str) -> ProgressBar {
        if self.format == OutputFormat::Json {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label);
        bar
    }

    /// Streams a local file to the server under its base name.
    ///
    /// A local read failure sends an empty message before the stream closes, so the server
    /// rejects the upload and discards what it received.
    pub async fn upload(&mut self, local: &Path) -> anyhow::Result<()> {
        let filename = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("invalid local file name: {}", local.display()))?
            .to_string();

        let file = File::open(local)
            .await
            .with_context(|| format!("failed to open file {}", local.display()))?;
        let size = file.metadata().await.context("failed to stat file")?.len();

        let progress = self.transfer_bar(size, "Uploading");
        let (tx, rx) = mpsc::channel(UPLOAD_BUFFER);

        let outbound = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        let request = self.request(outbound);
        let call = self.client.upload(request);
        let feeder = feed_upload(file, filename.clone(), size, tx, progress.clone());

        let result = tokio::try_join!(feeder, async {
            call.await.map_err(|status| rpc_error("upload failed", status))
        });
        progress.finish_and_clear();

        let (sent, response) = result?;
        let response = response.into_inner();
        if !response.success {
            bail!("server error: {}", response.message);
        }

        let mut stdout = std::io::stdout();
        match self.format {
            OutputFormat::Json => output::write_json(&mut stdout, &response)?,
            OutputFormat::Table => writeln!(
                stdout,
                "Uploaded '{}' successfully ({} bytes)",
                filename, sent
            )?,
        }
        Ok(())
    }

    /// Fetches `remote` into `local` (default: the remote name in the current directory).
    ///
    /// The local file is created only once the server has sent the metadata message, and is
    /// removed again if the transfer fails part way.
    pub async fn download(&mut self, remote: &str, local: Option<PathBuf>) -> anyhow::Result<()> {
        let local = local.unwrap_or_else(|| PathBuf::from(remote));

        let request = self.request(pb::DownloadRequest {
            filename: remote.to_string(),
        });
        let mut stream = self
            .client
            .download(request)
            .await
            .map_err(|status| rpc_error("failed to start download", status))?
            .into_inner();

        let first = stream
            .message()
            .await
            .map_err(|status| rpc_error("failed to receive metadata", status))?
            .ok_or_else(|| anyhow!("download ended before metadata"))?;
        let metadata = match first.data {
            Some(download_response::Data::Metadata(metadata)) => metadata,
            _ => bail!("expected metadata, got chunk"),
        };

        let mut file = File::create(&local)
            .await
            .with_context(|| format!("failed to create local file {}", local.display()))?;

        let progress = self.transfer_bar(metadata.size, "Downloading");
        let result = receive_chunks(&mut stream, &mut file, &progress).await;
        progress.finish_and_clear();

        let received = match result {
            Ok(received) => received,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&local).await;
                return Err(e);
            }
        };

        let mut stdout = std::io::stdout();
        match self.format {
            OutputFormat::Json => output::write_json(
                &mut stdout,
                &serde_json::json!({
                    "filename": metadata.filename,
                    "local_path": local.display().to_string(),
                    "size": received,
                }),
            )?,
            OutputFormat::Table => writeln!(
                stdout,
                "Downloaded '{}' to '{}' ({} bytes)",
                remote,
                local.display(),
                received
            )?,
        }
        Ok(())
    }

    pub async fn list(&mut self, prefix: Option<String>) -> anyhow::Result<()> {
        let request = self.request(pb::ListRequest {
            prefix: prefix.unwrap_or_default(),
        });
        let response = self
            .client
            .list(request)
            .await
            .map_err(|status| rpc_error("failed to list files", status))?
            .into_inner();

        output::write_file_list(&mut std::io::stdout(), response.files, self.format)?;
        Ok(())
    }

    pub async fn delete(&mut self, filename: &str) -> anyhow::Result<()> {
        let request = self.request(pb::DeleteRequest {
            filename: filename.to_string(),
        });
        let response = self
            .client
            .delete(request)
            .await
            .map_err(|status| rpc_error("failed to delete file", status))?
            .into_inner();

        output::write_delete(&mut std::io::stdout(), filename, &response, self.format)?;
        Ok(())
    }

    pub async fn stat(&mut self, filename: &str) -> anyhow::Result<()> {
        let request = self.request(pb::StatRequest {
            filename: filename.to_string(),
        });
        let response = self
            .client
            .stat(request)
            .await
            .map_err(|status| rpc_error("failed to get file info", status))?
            .into_inner();

        output::write_stat(&mut std::io::stdout(), filename, &response, self.format)?;
        Ok(())
    }
}

/// Sends the metadata message then the reader's contents in fixed-size chunks.
///
/// Stops quietly if the call has already ended; its status carries the real error.
async fn feed_upload<R: AsyncRead + Unpin>(
    mut reader: R,
    filename: String,
    size: u64,
    tx: mpsc::Sender<pb::UploadRequest>,
    progress: ProgressBar,
) -> anyhow::Result<u64> {
    let metadata = pb::UploadRequest {
        data: Some(upload_request::Data::Metadata(pb::FileMetadata {
            filename,
            size,
        })),
    };
    if tx.send(metadata).await.is_err() {
        return Ok(0);
    }

    let mut sent = 0u64;
    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                // An empty message is a sequence violation: the server aborts instead of
                // committing the bytes it already has when the stream ends.
                let _ = tx.send(pb::UploadRequest { data: None }).await;
                return Err(anyhow::Error::new(e).context("failed to read file"));
            }
        };
        if n == 0 {
            break;
        }
        let chunk = pb::UploadRequest {
            data: Some(upload_request::Data::Chunk(buf[..n].to_vec())),
        };
        if tx.send(chunk).await.is_err() {
            break;
        }
        sent += n as u64;
        progress.inc(n as u64);
    }
    Ok(sent)
}

async fn receive_chunks(
    stream: &mut Streaming<pb::DownloadResponse>,
    file: &mut File,
    progress: &ProgressBar,
) -> anyhow::Result<u64> {
    let mut received = 0u64;
    while let Some(message) = stream
        .message()
        .await
        .map_err(|status| rpc_error("download failed", status))?
    {
        match message.data {
            Some(download_response::Data::Chunk(chunk)) => {
                file.write_all(&chunk)
                    .await
                    .context("failed to write to file")?;
                received += chunk.len() as u64;
                progress.inc(chunk.len() as u64);
            }
            _ => bail!("unexpected metadata message mid-download"),
        }
    }
    file.flush().await.context("failed to write to file")?;
    Ok(received)
}
