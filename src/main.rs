//! fetch-a-file: a line-protocol TCP file server
//!
//! Modes:
//! - serve: `GET <filename>` over TCP from a flat serving root
//! - relay: forward clients to a fixed upstream
//! - echo: send client bytes back
//!
//! Configuration via CLI arguments or TOML file.

use fetch_a_file::config::Config;
use fetch_a_file::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        root = %config.root.display(),
        workers = ?config.workers,
        max_connections = config.max_connections,
        "Starting fetch-a-file server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(&config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, no longer accepting connections");
        }
    }

    Ok(())
}
