mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::Session;
use output::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dfs")]
#[command(about = "DFS file service client")]
struct Cli {
    /// Server address (host:port or URL)
    #[arg(long, env = "DFS_SERVER", default_value = "http://localhost:50051")]
    server: String,

    /// Deadline for each request, in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// Path of the file to send; it is stored under its base name
        local_file: PathBuf,
    },
    /// Download a stored file
    Download {
        /// Name of the stored file
        remote_file: String,
        /// Local destination (defaults to the remote name)
        local_path: Option<PathBuf>,
    },
    /// List stored files
    List {
        /// Only show files whose name starts with this prefix
        prefix: Option<String>,
    },
    /// Delete a stored file
    Delete { filename: String },
    /// Show information about a stored file
    Stat { filename: String },
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut session = Session::connect(
        &cli.server,
        Duration::from_secs(cli.timeout_secs),
        cli.output,
    )
    .await?;

    match cli.command {
        Commands::Upload { local_file } => session.upload(&local_file).await,
        Commands::Download {
            remote_file,
            local_path,
        } => session.download(&remote_file, local_path).await,
        Commands::List { prefix } => session.list(prefix).await,
        Commands::Delete { filename } => session.delete(&filename).await,
        Commands::Stat { filename } => session.stat(&filename).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
