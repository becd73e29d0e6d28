//! Error handling.
//!
//! `ErrorKind` enumerates everything that can go wrong while serving the
//! protocol; `ServerError` is the uniform wrapper handlers return. Protocol
//! errors translate directly to their HTTP status, and every response body
//! uses the structured `{code, error, message}` document the client decodes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use displaydoc::Display;
use serde_json::json;
use tracing::error;

pub type ServerResult<T> = Result<T, ServerError>;

/// The kind of an error.
#[derive(Debug, Display)]
pub enum ErrorKind {
    /// The requested upload does not exist
    NotFound,

    /// Upload offset mismatch: client sent {client}, server is at {server}
    OffsetConflict { client: i64, server: i64 },

    /// PATCH requests must use the {0} content type
    MediaTypeUnsupported(&'static str),

    /// Declared length {requested} exceeds the maximum of {max} bytes
    PayloadTooLarge { requested: i64, max: i64 },

    /// File extension of "{0}" is not allowed
    ExtensionRejected(String),

    /// Upload is not downloadable while {0}
    NotDownloadable(&'static str),

    /// Invalid request: {0}
    RequestError(anyhow::Error),

    /// Staging storage error: {0}
    StorageError(anyhow::Error),

    /// Object store error: {0}
    RemoteStoreError(anyhow::Error),

    /// Database error: {0}
    DatabaseError(sea_orm::DbErr),

    /// Internal server error: {0}
    Internal(anyhow::Error),
}

impl ErrorKind {
    fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::OffsetConflict { .. } => "OffsetConflict",
            Self::MediaTypeUnsupported(_) => "MediaTypeUnsupported",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::ExtensionRejected(_) => "ExtensionRejected",
            Self::NotDownloadable(_) => "NotDownloadable",
            Self::RequestError(_) => "BadRequest",
            Self::StorageError(_) => "StorageIO",
            Self::RemoteStoreError(_) => "RemoteStoreIO",
            Self::DatabaseError(_) => "DatabaseError",
            Self::Internal(_) => "Internal",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::OffsetConflict { .. } | Self::NotDownloadable(_) => StatusCode::CONFLICT,
            Self::MediaTypeUnsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ExtensionRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RequestError(_) => StatusCode::BAD_REQUEST,
            Self::StorageError(_)
            | Self::RemoteStoreError(_)
            | Self::DatabaseError(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A server error with a uniform HTTP rendering.
#[derive(Debug)]
pub struct ServerError {
    kind: ErrorKind,
}

impl ServerError {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn request_error(error: impl Into<anyhow::Error>) -> Self {
        ErrorKind::RequestError(error.into()).into()
    }

    pub fn storage_error(error: impl Into<anyhow::Error>) -> Self {
        ErrorKind::StorageError(error.into()).into()
    }

    pub fn remote_store_error(error: impl Into<anyhow::Error>) -> Self {
        ErrorKind::RemoteStoreError(error.into()).into()
    }

    pub fn database_error(error: sea_orm::DbErr) -> Self {
        ErrorKind::DatabaseError(error).into()
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ServerError {}

impl From<ErrorKind> for ServerError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl From<sea_orm::DbErr> for ServerError {
    fn from(error: sea_orm::DbErr) -> Self {
        ErrorKind::DatabaseError(error).into()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(error: std::io::Error) -> Self {
        ErrorKind::StorageError(error.into()).into()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.kind.http_status();

        if status.is_server_error() {
            error!("{}", self.kind);
        }

        let body = Json(json!({
            "code": status.as_u16(),
            "error": self.kind.name(),
            "message": self.kind.to_string(),
        }));

        (status, body).into_response()
    }
}
