//! Completion pipeline.
//!
//! Runs exactly once per session, triggered by the append that pushed the
//! offset to the declared length: verify the client checksum, promote the
//! staging file to the object store, then notify the webhook.
//!
//! Failure handling is deliberately asymmetric. A staging read failure or an
//! object-store failure marks the session `failed`; a checksum mismatch only
//! records `checksum_verified = false`, and a webhook failure is logged and
//! nothing else. On the success path the staging file is never deleted here:
//! late HEAD and download requests may still be served from it, and the
//! sweeper owns its lifetime. A `failed` session is terminal, so its staging
//! file is released immediately.

use chrono::Utc;
use sea_orm::ActiveModelTrait;
use sea_orm::ActiveValue::Set;
use tracing::{debug, info, instrument, warn};

use tusk::api::tus::{self, CompletionNotice};
use tusk::checksum;

use crate::database::entity::file_info::{self, UploadStatus};
use crate::error::{ServerError, ServerResult};
use crate::State;

/// Drives the pipeline for a freshly-completed session.
///
/// Any hard failure has already been reflected in the session's status by
/// the time this returns, so callers only log.
#[instrument(skip_all, fields(uri = %file.upload_uri))]
pub async fn finalize(state: &State, file: file_info::Model) {
    let uri = file.upload_uri.clone();

    if let Err(e) = run(state, file).await {
        warn!(%uri, "completion pipeline failed: {}", e);
    }
}

async fn run(state: &State, mut file: file_info::Model) -> ServerResult<()> {
    let id = tus::upload_id(&file.upload_uri).to_string();

    match verify_checksum(state, &id, &file).await {
        Ok(verified) => {
            file_info::ActiveModel {
                id: Set(file.id),
                checksum_verified: Set(verified),
                updated_at: Set(Utc::now()),
                ..Default::default()
            }
            .update(&state.db)
            .await
            .map_err(ServerError::database_error)?;
            file.checksum_verified = verified;
        }
        Err(e) => {
            mark_failed(state, &file).await?;
            return Err(e);
        }
    }

    match promote(state, &id, &file).await {
        Ok(object_key) => {
            file_info::ActiveModel {
                id: Set(file.id),
                status: Set(UploadStatus::Transferred),
                object_key: Set(Some(object_key.clone())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            }
            .update(&state.db)
            .await
            .map_err(ServerError::database_error)?;
            file.status = UploadStatus::Transferred;
            file.object_key = Some(object_key);
        }
        Err(e) => {
            mark_failed(state, &file).await?;
            return Err(e);
        }
    }

    notify_webhook(state, &file).await;

    Ok(())
}

/// Streams the staging file through SHA-256 and compares it against the
/// client-declared digest. Sessions without a declared checksum stay
/// unverified.
async fn verify_checksum(
    state: &State,
    id: &str,
    file: &file_info::Model,
) -> ServerResult<bool> {
    let expected = match file.expected_checksum.as_deref() {
        Some(checksum) if !checksum.is_empty() => checksum,
        _ => {
            debug!("no client checksum, skipping verification");
            return Ok(false);
        }
    };

    let staged = state
        .staging
        .open(id)
        .await
        .map_err(ServerError::storage_error)?;
    let actual = checksum::sha256_hex(staged)
        .await
        .map_err(ServerError::storage_error)?;

    let verified = checksum::matches(expected, &actual);
    if verified {
        info!("checksum verified");
    } else {
        warn!(expected, computed = %actual, "checksum mismatch");
    }

    Ok(verified)
}

/// Copies the staging file into the object store as a single object keyed
/// `<uploadId>/<fileName>`.
async fn promote(state: &State, id: &str, file: &file_info::Model) -> ServerResult<String> {
    let object_key = format!("{}/{}", id, file.file_name);
    let staging_path = state.staging.path(id);

    state
        .object_store
        .put_file(&object_key, &staging_path, file.total_size)
        .await?;

    info!(%object_key, "promoted to object store");
    Ok(object_key)
}

/// POSTs the completion notice. Best-effort: a delivery failure never
/// touches the session status.
async fn notify_webhook(state: &State, file: &file_info::Model) {
    if !state.config.callback.enabled {
        return;
    }

    let url = match state.config.callback.url.as_deref() {
        Some(url) if !url.is_empty() => url,
        _ => {
            warn!("callback enabled but no URL configured");
            return;
        }
    };

    let notice = CompletionNotice {
        upload_uri: file.upload_uri.clone(),
        file_name: file.file_name.clone(),
        total_size: file.total_size,
        status: file.status.as_str().to_string(),
        object_key: file.object_key.clone(),
        checksum_verified: file.checksum_verified,
    };

    let response = state.http.post(url).json(&notice).send().await;

    match response {
        Ok(res) if res.status().is_success() => {
            let update = file_info::ActiveModel {
                id: Set(file.id),
                callback_sent: Set(true),
                updated_at: Set(Utc::now()),
                ..Default::default()
            }
            .update(&state.db)
            .await;

            if let Err(e) = update {
                warn!("failed to record webhook delivery: {}", e);
            } else {
                info!(%url, "completion webhook delivered");
            }
        }
        Ok(res) => {
            warn!(%url, status = %res.status(), "completion webhook rejected");
        }
        Err(e) => {
            warn!(%url, "completion webhook failed: {}", e);
        }
    }
}

async fn mark_failed(state: &State, file: &file_info::Model) -> ServerResult<()> {
    file_info::ActiveModel {
        id: Set(file.id),
        status: Set(UploadStatus::Failed),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
    .update(&state.db)
    .await
    .map_err(ServerError::database_error)?;

    // Failed is terminal: only uploading and completed sessions keep a
    // staging file.
    let id = tus::upload_id(&file.upload_uri);
    if let Err(e) = state.staging.remove(id).await {
        warn!(%id, "failed to remove staging file: {}", e);
    }

    Ok(())
}
