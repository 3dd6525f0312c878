//! Command-line client for fetch-a-file servers.

use clap::Parser;
use fetch_a_file::client::{self, FetchError};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fetch")]
#[command(about = "Download a file from a fetch-a-file server", long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8002")]
    server: String,

    /// Name of the file to fetch
    filename: String,

    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let received = match &cli.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            let result = client::fetch(&cli.server, &cli.filename, &mut file).await;
            file.flush().await?;
            drop(file);

            if let Err(FetchError::Truncated { .. }) = &result {
                let _ = tokio::fs::remove_file(path).await;
            }
            result?
        }
        None => {
            let mut stdout = tokio::io::stdout();
            client::fetch(&cli.server, &cli.filename, &mut stdout).await?
        }
    };

    info!(server = %cli.server, filename = %cli.filename, bytes = received, "Fetched file");
    Ok(())
}
