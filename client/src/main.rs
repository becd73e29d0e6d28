mod api;
mod batch;
mod config;
mod fingerprint;
mod location_store;
mod uploader;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use reqwest::Url;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::ApiClient;
use batch::BatchUploader;
use config::ByteSize;
use location_store::LocationStore;

/// Resumable upload client for tuskd.
#[derive(Debug, Parser)]
#[command(name = "tusk", version, about)]
struct Opts {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server endpoint, e.g. http://localhost:8080 (overrides the config).
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload one or more files, resuming where possible.
    Upload {
        /// Files to upload.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Bytes per PATCH request, e.g. "3MiB".
        #[arg(long)]
        chunk_size: Option<ByteSize>,

        /// Maximum uploads in flight at once.
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Show the server-side offset of an upload URL.
    Offset {
        /// Upload URL as returned on creation.
        url: Url,
    },

    /// Cancel an upload and delete its server-side state.
    Cancel {
        /// Upload URL as returned on creation.
        url: Url,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let opts = Opts::parse();
    let mut config = config::load(opts.config.as_deref())?;
    if let Some(endpoint) = opts.endpoint {
        config.endpoint = endpoint;
    }

    match opts.command {
        Command::Upload {
            paths,
            chunk_size,
            max_concurrent,
        } => {
            if let Some(size) = chunk_size {
                config.chunk_size = size;
            }
            if let Some(limit) = max_concurrent {
                config.max_concurrent = limit;
            }

            let api = ApiClient::new(&config.endpoint)?;
            let store = Arc::new(LocationStore::open(config.location_store_path())?);

            if let [path] = paths.as_slice() {
                let mp = MultiProgress::new();
                uploader::upload_file(&api, &store, &config, path, mp).await?;
                eprintln!("uploaded {}", path.display());
            } else {
                let uploader = BatchUploader::new(api, store, Arc::new(config));
                for path in paths {
                    uploader.queue(path).await?;
                }

                let summary = uploader.wait().await;
                summary.print();

                if summary.failed > 0 {
                    return Err(anyhow!("{} upload(s) failed", summary.failed));
                }
            }
        }

        Command::Offset { url } => {
            let api = ApiClient::new(&config.endpoint)?;
            match api.upload_offset(url).await? {
                Some((offset, length)) => println!("{}/{}", offset, length),
                None => return Err(anyhow!("unknown upload")),
            }
        }

        Command::Cancel { url } => {
            let api = ApiClient::new(&config.endpoint)?;
            api.terminate(url).await?;
            eprintln!("upload cancelled");
        }
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "tusk_client=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
