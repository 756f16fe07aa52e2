//! gitpulse - main entry point.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use gitpulse::config::Config;
use gitpulse::error::Error;
use gitpulse::indexer::Supervisor;
use gitpulse::store::SqliteStore;
use gitpulse::upstream::UpstreamClient;

#[derive(Parser)]
#[command(name = "gitpulse")]
#[command(version, about = "Continuous commit indexer for git-hosting repositories")]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let directive = if cli.debug {
        "gitpulse=debug"
    } else {
        "gitpulse=info"
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(directive.parse().expect("static directive parses"));
    fmt().with_env_filter(filter).with_target(false).init();

    if let Err(e) = run().await {
        error!(error = %e, "service failed");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), Error> {
    let config = Config::from_env()?;

    let store = Arc::new(SqliteStore::connect(&config.database_path).await?);
    info!(database = %config.database_path, "storage ready");

    let upstream = Arc::new(UpstreamClient::new(
        config.upstream_base_url.clone(),
        config.upstream_token.clone(),
    )?);

    let supervisor = Supervisor::new(config, store, upstream);

    // First ctrl-c starts a graceful drain; workers finish their current
    // page and checkpoint before the process exits.
    let cancel = supervisor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            cancel.cancel();
        }
    });

    supervisor.run().await?;
    Ok(())
}
