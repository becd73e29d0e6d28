//! Expiration sweeper.
//!
//! Periodically removes `uploading` sessions that have gone idle past the
//! configured timeout, both the metadata row and the staging file. The row
//! delete is conditional on `updated_at` not having advanced since the
//! query, so a session that received an append after being selected is left
//! alone.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use tusk::api::tus;

use crate::database::entity::file_info::UploadStatus;
use crate::database::TuskDatabase;
use crate::error::ServerResult;
use crate::State;

/// Runs the sweeper until the process exits.
pub async fn run(state: State) {
    let period = Duration::from_secs(state.config.expiration.interval_secs);
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Err(e) = sweep_once(&state).await {
            warn!("expiration sweep failed: {}", e);
        }
    }
}

/// One sweep pass. Returns the number of sessions removed.
pub async fn sweep_once(state: &State) -> ServerResult<usize> {
    let timeout = chrono::Duration::seconds(state.config.expiration.timeout_secs as i64);
    let cutoff = Utc::now() - timeout;

    let stale = state
        .db
        .find_stale_by_status(UploadStatus::Uploading, cutoff)
        .await?;

    if stale.is_empty() {
        return Ok(0);
    }

    let mut removed = 0;

    for file in stale {
        let id = tus::upload_id(&file.upload_uri).to_string();

        // Re-check at delete time: an append that advanced updated_at since
        // the query wins over the sweep.
        match state
            .db
            .delete_if_untouched(&file.upload_uri, file.updated_at)
            .await
        {
            Ok(true) => {
                if let Err(e) = state.staging.remove(&id).await {
                    warn!(uri = %file.upload_uri, "failed to remove staging file: {}", e);
                }
                removed += 1;
            }
            Ok(false) => {
                debug!(uri = %file.upload_uri, "session advanced since query, skipping");
            }
            Err(e) => {
                warn!(uri = %file.upload_uri, "failed to expire session: {}", e);
            }
        }
    }

    info!("expired {} stale upload session(s)", removed);
    Ok(removed)
}
