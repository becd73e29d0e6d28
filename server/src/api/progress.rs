//! Upload progress API.
//!
//! Read-only projections of the metadata store, for dashboards and for
//! clients that want progress without speaking TUS.

use axum::extract::{Extension, Path};
use axum::Json;
use tracing::instrument;

use tusk::api::tus::{self, UploadProgress};

use crate::database::entity::file_info;
use crate::database::TuskDatabase;
use crate::error::{ErrorKind, ServerResult};
use crate::State;

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn get_progress(
    Extension(state): Extension<State>,
    Path(id): Path<String>,
) -> ServerResult<Json<UploadProgress>> {
    let uri = normalize_uri(&id);
    let file = state
        .db
        .find_by_uri(&uri)
        .await?
        .ok_or(ErrorKind::NotFound)?;

    Ok(Json(project(&file)))
}

#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn list_progress(
    Extension(state): Extension<State>,
) -> ServerResult<Json<Vec<UploadProgress>>> {
    let files = state.db.list_all().await?;
    Ok(Json(files.iter().map(project).collect()))
}

/// Accepts either a bare upload id or a full `/files/<id>` path.
fn normalize_uri(id: &str) -> String {
    if id.starts_with(tus::FILES_ROOT) {
        id.to_string()
    } else {
        tus::upload_uri(id)
    }
}

fn project(file: &file_info::Model) -> UploadProgress {
    UploadProgress {
        upload_uri: file.upload_uri.clone(),
        file_name: file.file_name.clone(),
        total_size: file.total_size,
        offset: file.offset_bytes,
        status: file.status.as_str().to_string(),
        object_key: file.object_key.clone(),
        checksum_verified: file.checksum_verified,
        callback_sent: file.callback_sent,
        percent: tus::percent(file.offset_bytes, file.total_size),
    }
}
