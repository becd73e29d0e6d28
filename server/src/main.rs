use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tusk_server::{config, database, run_server};

/// The tusk upload server.
#[derive(Debug, Parser)]
#[command(version, about = "TUS resumable upload server with object-store promotion")]
struct Opts {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let opts = Opts::parse();
    let config = config::load(&opts.config)?;

    if opts.migrate {
        // connect() brings the schema up to date
        database::connect(&config.database.url).await?;
        return Ok(());
    }

    run_server(config).await
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tusk_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
