use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tonic::transport::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_grpc::DfsService;
use api_grpc::pb::file_service_server::FileServiceServer;
use api_shared::FILE_DESCRIPTOR_SET;
use dfs_core::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_DATA_DIR};
use dfs_core::{CoreConfig, StorageService};

/// DFS file server
///
/// Every option can also be supplied through its environment variable, including via a `.env`
/// file in the working directory.
#[derive(Parser, Debug)]
#[command(name = "dfs-run", version, about = "Chunked file transfer server over gRPC")]
struct ServerArgs {
    /// Address the gRPC server listens on
    #[arg(long, env = "DFS_ADDR", default_value = "0.0.0.0:50051")]
    addr: SocketAddr,

    /// Directory holding stored files and in-flight uploads
    #[arg(long, env = "DFS_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Maximum bytes per download chunk
    #[arg(long, env = "DFS_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Upper bound on a single upload or download, in seconds
    #[arg(long, env = "DFS_TRANSFER_TIMEOUT_SECS", default_value_t = 300)]
    transfer_timeout_secs: u64,

    /// Expose the gRPC reflection service
    #[arg(long, env = "DFS_ENABLE_REFLECTION")]
    enable_reflection: bool,
}

/// Main entry point for the DFS server
///
/// Builds the storage service from the parsed arguments and serves `dfs.v1.FileService` until
/// CTRL+C or SIGTERM. In-flight requests are allowed to finish before the process exits.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dfs=info".parse()?)
                .add_directive("api_grpc=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ServerArgs::parse();

    let config = CoreConfig::new(
        args.data_dir,
        args.chunk_size,
        Duration::from_secs(args.transfer_timeout_secs),
    )?;
    let storage = StorageService::new(&config)?;
    let service = DfsService::new(storage, config.transfer_timeout());

    tracing::info!("++ Starting DFS gRPC on {}", args.addr);
    tracing::info!(
        data_dir = %config.data_dir().display(),
        chunk_size = config.chunk_size(),
        timeout_secs = config.transfer_timeout().as_secs(),
        "storage ready"
    );

    let reflection = if args.enable_reflection {
        tracing::info!("gRPC reflection enabled");
        Some(
            tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
                .build_v1()?,
        )
    } else {
        None
    };

    Server::builder()
        .add_service(FileServiceServer::new(service))
        .add_optional_service(reflection)
        .serve_with_shutdown(args.addr, shutdown_signal())
        .await?;

    tracing::info!("DFS server stopped");
    Ok(())
}

/// Resolves on CTRL+C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("Received CTRL+C"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                tracing::info!("Received CTRL+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received CTRL+C");
    }
}
