//! tuskd, the tusk upload server.
//!
//! Implements the TUS 1.0.0 creation/termination/checksum/expiration subset
//! over a two-stage storage pipeline: chunks are appended to local staging
//! files, and a finished upload is promoted to an object store.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod pipeline;
pub mod staging;
pub mod storage;
pub mod sweeper;

use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue};
use axum::routing::{get, head, options};
use axum::{Extension, Router};
use sea_orm::DatabaseConnection;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tusk::api::tus::{HEADER_TUS_RESUMABLE, TUS_VERSION};

use config::Config;
use staging::StagingStore;
use storage::ObjectStoreBackend;

pub struct StateInner {
    pub config: Config,
    pub db: DatabaseConnection,
    pub staging: StagingStore,
    pub object_store: ObjectStoreBackend,
    pub http: reqwest::Client,
}

/// Shared server state, cheap to clone into handlers and tasks.
pub type State = Arc<StateInner>;

/// Assembles the state from a loaded configuration.
pub async fn build_state(config: Config) -> Result<State> {
    let db = database::connect(&config.database.url).await?;
    let staging = StagingStore::new(config.storage_path.clone()).await?;
    let object_store = ObjectStoreBackend::from_config(&config.storage).await?;
    let http = reqwest::Client::new();

    Ok(Arc::new(StateInner {
        config,
        db,
        staging,
        object_store,
        http,
    }))
}

/// Builds the full router. Every response carries `Tus-Resumable: 1.0.0`.
pub fn make_router(state: State) -> Router {
    Router::new()
        .route(
            "/files",
            options(api::tus::discover).post(api::tus::create),
        )
        .route(
            "/files/{id}",
            head(api::tus::inspect)
                .patch(api::tus::append)
                .delete(api::tus::terminate),
        )
        .route("/api/progress/list", get(api::progress::list_progress))
        .route("/api/progress/{id}", get(api::progress::get_progress))
        .route("/api/files/{id}/download", get(api::download::download))
        .layer(Extension(state))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(HEADER_TUS_RESUMABLE),
            HeaderValue::from_static(TUS_VERSION),
        ))
}

/// Runs the server (and the sweeper, when enabled) until shutdown.
pub async fn run_server(config: Config) -> Result<()> {
    let state = build_state(config).await?;

    if state.config.expiration.enabled {
        tokio::spawn(sweeper::run(state.clone()));
    }

    let listen = state.config.listen;
    let router = make_router(state);

    let listener = TcpListener::bind(listen).await?;
    info!("tuskd listening on {}", listen);
    axum::serve(listener, router).await?;

    Ok(())
}
