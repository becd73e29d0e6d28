//! The TUS 1.0.0 protocol engine.
//!
//! Five verbs on the `/files` collection: OPTIONS (discovery), POST
//! (creation), HEAD (offset inspection), PATCH (append) and DELETE
//! (termination). The offset contract on PATCH is the protocol's central
//! safety invariant: a request whose `Upload-Offset` does not equal the
//! server-side offset is rejected with 409 and changes nothing.

use std::io;

use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use sea_orm::ActiveModelTrait;
use sea_orm::ActiveValue::Set;
use tokio_util::io::StreamReader;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use tusk::api::tus::{
    self, HEADER_TUS_EXTENSION, HEADER_TUS_MAX_SIZE, HEADER_TUS_VERSION, HEADER_UPLOAD_LENGTH,
    HEADER_UPLOAD_METADATA, HEADER_UPLOAD_OFFSET, META_CHECKSUM, META_FILENAME,
    OFFSET_OCTET_STREAM, TUS_EXTENSIONS, TUS_VERSION,
};
use tusk::metadata;

use crate::database::entity::file_info::{self, UploadStatus};
use crate::database::TuskDatabase;
use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::pipeline;
use crate::State;

/// Fallback when the client did not declare a file name.
const UNNAMED_FILE: &str = "unknown";

/// Discovery: advertises the protocol version, size cap and extensions.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn discover(Extension(state): Extension<State>) -> ServerResult<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HEADER_TUS_VERSION),
        HeaderValue::from_static(TUS_VERSION),
    );
    headers.insert(
        HeaderName::from_static(HEADER_TUS_MAX_SIZE),
        header_value(state.config.max_upload_size)?,
    );
    headers.insert(
        HeaderName::from_static(HEADER_TUS_EXTENSION),
        HeaderValue::from_static(TUS_EXTENSIONS),
    );

    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

/// Creation: allocates an upload id, a staging file and a metadata row.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn create(
    Extension(state): Extension<State>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let total_size = required_i64_header(&headers, HEADER_UPLOAD_LENGTH)?;
    if total_size < 0 {
        return Err(ServerError::request_error(anyhow!(
            "Upload-Length must not be negative"
        )));
    }

    if total_size > state.config.max_upload_size {
        return Err(ErrorKind::PayloadTooLarge {
            requested: total_size,
            max: state.config.max_upload_size,
        }
        .into());
    }

    let meta = headers
        .get(HEADER_UPLOAD_METADATA)
        .and_then(|v| v.to_str().ok())
        .map(metadata::parse)
        .unwrap_or_default();

    let declared_name = meta.get(META_FILENAME).cloned();
    if let Some(file_name) = &declared_name {
        check_extension_allowed(&state, file_name)?;
    }
    let file_name = declared_name.unwrap_or_else(|| UNNAMED_FILE.to_string());

    let id = Uuid::new_v4().simple().to_string();
    let uri = tus::upload_uri(&id);

    state
        .staging
        .create(&id)
        .await
        .map_err(ServerError::storage_error)?;

    let now = Utc::now();
    let model = file_info::ActiveModel {
        upload_uri: Set(uri.clone()),
        file_name: Set(file_name),
        total_size: Set(total_size),
        offset_bytes: Set(0),
        status: Set(UploadStatus::Uploading),
        expected_checksum: Set(meta
            .get(META_CHECKSUM)
            .filter(|c| !c.is_empty())
            .cloned()),
        checksum_verified: Set(false),
        object_key: Set(None),
        callback_sent: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    if let Err(e) = state.db.insert_file(model).await {
        // Roll back the staging allocation before surfacing the error.
        if let Err(cleanup) = state.staging.remove(&id).await {
            warn!(%id, "failed to roll back staging file: {}", cleanup);
        }
        return Err(e);
    }

    info!(%uri, total_size, "created upload session");

    let location = format!(
        "{}{}",
        state.config.api_endpoint.trim_end_matches('/'),
        uri
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&location).map_err(ServerError::request_error)?,
    );
    headers.insert(
        HeaderName::from_static(HEADER_UPLOAD_OFFSET),
        HeaderValue::from_static("0"),
    );

    Ok((StatusCode::CREATED, headers).into_response())
}

/// Inspection: reports the persisted offset so a client can resume.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn inspect(
    Extension(state): Extension<State>,
    Path(id): Path<String>,
) -> ServerResult<Response> {
    let uri = tus::upload_uri(&id);
    let file = state
        .db
        .find_by_uri(&uri)
        .await?
        .ok_or(ErrorKind::NotFound)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HEADER_UPLOAD_OFFSET),
        header_value(file.offset_bytes)?,
    );
    headers.insert(
        HeaderName::from_static(HEADER_UPLOAD_LENGTH),
        header_value(file.total_size)?,
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((StatusCode::OK, headers).into_response())
}

/// Append: writes the request body at exactly the current offset.
///
/// The per-upload staging lock is held across the offset check, the write
/// and the offset persist, so concurrent appends serialize and the loser
/// observes a mismatch. Bytes beyond the declared length are discarded. The
/// append that reaches the declared length transitions the session via a
/// conditional update and runs the completion pipeline before responding,
/// so the 204 already reflects the pipeline outcome.
#[instrument(skip_all, fields(id = %id))]
#[axum_macros::debug_handler]
pub(crate) async fn append(
    Extension(state): Extension<State>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> ServerResult<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != OFFSET_OCTET_STREAM {
        return Err(ErrorKind::MediaTypeUnsupported(OFFSET_OCTET_STREAM).into());
    }

    let client_offset = required_i64_header(&headers, HEADER_UPLOAD_OFFSET)?;
    let uri = tus::upload_uri(&id);

    let _guard = state.staging.lock(&id).await;

    let file = state
        .db
        .find_by_uri(&uri)
        .await?
        .ok_or(ErrorKind::NotFound)?;

    if client_offset != file.offset_bytes {
        return Err(ErrorKind::OffsetConflict {
            client: client_offset,
            server: file.offset_bytes,
        }
        .into());
    }

    let remaining = (file.total_size - file.offset_bytes) as u64;
    let stream = body.into_data_stream();
    let reader = StreamReader::new(
        stream.map(|r| r.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))),
    );

    let written = state
        .staging
        .append_at(&id, file.offset_bytes as u64, reader, remaining)
        .await
        .map_err(ServerError::storage_error)? as i64;

    let new_offset = file.offset_bytes + written;
    file_info::ActiveModel {
        id: Set(file.id),
        offset_bytes: Set(new_offset),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
    .update(&state.db)
    .await
    .map_err(ServerError::database_error)?;

    info!(offset = new_offset, total = file.total_size, "chunk written");

    if new_offset == file.total_size {
        // Only the append that won the conditional transition finalizes.
        if state.db.mark_completed(&uri).await? {
            if let Some(completed) = state.db.find_by_uri(&uri).await? {
                pipeline::finalize(&state, completed).await;
            }
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HEADER_UPLOAD_OFFSET),
        header_value(new_offset)?,
    );

    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

/// Termination: removes the staging file and the metadata row.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn terminate(
    Extension(state): Extension<State>,
    Path(id): Path<String>,
) -> ServerResult<Response> {
    let uri = tus::upload_uri(&id);
    let _guard = state.staging.lock(&id).await;

    // The row delete is the gate: of two racing terminations only one
    // removes the row and gets the 204.
    if !state.db.delete_by_uri(&uri).await? {
        return Err(ErrorKind::NotFound.into());
    }

    state
        .staging
        .remove(&id)
        .await
        .map_err(ServerError::storage_error)?;

    info!(%uri, "upload terminated");

    Ok(StatusCode::NO_CONTENT.into_response())
}

fn check_extension_allowed(state: &State, file_name: &str) -> ServerResult<()> {
    let allowed = &state.config.allowed_extensions;
    if allowed.is_empty() {
        return Ok(());
    }

    let lower = file_name.to_lowercase();
    if allowed.iter().any(|ext| lower.ends_with(&ext.to_lowercase())) {
        return Ok(());
    }

    Err(ErrorKind::ExtensionRejected(file_name.to_string()).into())
}

fn required_i64_header(headers: &HeaderMap, name: &'static str) -> ServerResult<i64> {
    let value = headers
        .get(name)
        .ok_or_else(|| ErrorKind::RequestError(anyhow!("{} header is required", name)))?;

    value
        .to_str()
        .map_err(|_| ErrorKind::RequestError(anyhow!("{} has invalid encoding", name)))?
        .parse()
        .map_err(|_| ErrorKind::RequestError(anyhow!("{} must be an integer", name)).into())
}

fn header_value(value: i64) -> ServerResult<HeaderValue> {
    HeaderValue::from_str(&value.to_string()).map_err(ServerError::request_error)
}
