//! Main entry point for the dataspace-downloader CLI

use clap::Parser;
use dataspace_downloader::cli::{Cli, Commands};
use dataspace_downloader::metrics;
use dataspace_downloader::shutdown::{self, CancellationSignal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dataspace_downloader=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = metrics::init_metrics(addr) {
            warn!(error = %e, "Metrics exporter disabled");
        }
    }

    // Install the process-wide cancellation signal and the Ctrl+C handler
    let cancellation = CancellationSignal::shared();
    shutdown::set_global_cancellation(cancellation.clone());
    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - checkpointing transfers...");
                cancellation.cancel();
            }
        }
    });

    match &cli.command {
        Commands::Search(args) => {
            let session = cli.session(cancellation)?;
            args.execute(&session).await?;
        }
        Commands::Download(args) => {
            let session = cli.session(cancellation)?;
            args.execute(&cli, &session).await?;
        }
        Commands::Status(args) => args.execute(&cli.dest)?,
    }

    info!("Done");
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
