//! Download endpoint for received uploads.
//!
//! A transferred upload redirects to a presigned object-store URL (or
//! streams the object file on the local backend); a completed-but-not-yet
//! transferred upload streams straight from the staging copy.

use std::time::Duration;

use anyhow::anyhow;
use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument};

use tusk::api::tus;

use crate::database::entity::file_info::{self, UploadStatus};
use crate::database::TuskDatabase;
use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::storage::DownloadSource;
use crate::State;

const PRESIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

#[instrument(skip_all, fields(id = %id))]
#[axum_macros::debug_handler]
pub(crate) async fn download(
    Extension(state): Extension<State>,
    Path(id): Path<String>,
) -> ServerResult<Response> {
    let uri = tus::upload_uri(&id);
    let file = state
        .db
        .find_by_uri(&uri)
        .await?
        .ok_or(ErrorKind::NotFound)?;

    match file.status {
        UploadStatus::Transferred => {
            let key = file.object_key.as_deref().ok_or_else(|| {
                ErrorKind::Internal(anyhow!("transferred upload has no object key"))
            })?;

            match state.object_store.download(key, PRESIGNED_URL_TTL).await? {
                DownloadSource::Redirect(url) => {
                    info!(source = "object-store", "download redirect");
                    let mut response = StatusCode::FOUND.into_response();
                    response.headers_mut().insert(
                        header::LOCATION,
                        HeaderValue::from_str(&url).map_err(ServerError::request_error)?,
                    );
                    Ok(response)
                }
                DownloadSource::LocalFile(path) => {
                    info!(source = "object-store", "download stream");
                    let object = File::open(&path)
                        .await
                        .map_err(ServerError::remote_store_error)?;
                    stream_response(object, &file)
                }
            }
        }
        UploadStatus::Completed => {
            info!(source = "staging", "download stream");
            let staged = state
                .staging
                .open(&id)
                .await
                .map_err(ServerError::storage_error)?;
            stream_response(staged, &file)
        }
        status => Err(ErrorKind::NotDownloadable(status.as_str()).into()),
    }
}

fn stream_response(file: File, info: &file_info::Model) -> ServerResult<Response> {
    let disposition = format!("attachment; filename=\"{}\"", info.file_name);

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(ServerError::request_error)?,
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&info.total_size.to_string())
            .map_err(ServerError::request_error)?,
    );

    Ok(response)
}
