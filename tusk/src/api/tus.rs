//! TUS 1.0.0 wire constants and the JSON documents surrounding the protocol.

use serde::{Deserialize, Serialize};

/// The protocol version spoken on every request and response.
pub const TUS_VERSION: &str = "1.0.0";

/// Extensions advertised by the server.
pub const TUS_EXTENSIONS: &str = "creation,termination,checksum,expiration";

// Header names are kept lowercase so they can be used with
// `HeaderName::from_static` directly; HTTP header lookups are
// case-insensitive either way.

/// Header carrying the protocol version.
pub const HEADER_TUS_RESUMABLE: &str = "tus-resumable";

/// Header listing the protocol versions the server supports.
pub const HEADER_TUS_VERSION: &str = "tus-version";

/// Header announcing the maximum accepted upload size.
pub const HEADER_TUS_MAX_SIZE: &str = "tus-max-size";

/// Header listing the supported protocol extensions.
pub const HEADER_TUS_EXTENSION: &str = "tus-extension";

/// Header carrying the current byte offset of an upload.
pub const HEADER_UPLOAD_OFFSET: &str = "upload-offset";

/// Header carrying the declared total length of an upload.
pub const HEADER_UPLOAD_LENGTH: &str = "upload-length";

/// Header carrying client-supplied metadata on creation.
pub const HEADER_UPLOAD_METADATA: &str = "upload-metadata";

/// The only content type accepted on PATCH requests.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Collection root under which upload resources live.
pub const FILES_ROOT: &str = "/files";

/// Metadata key holding the original file name.
pub const META_FILENAME: &str = "filename";

/// Metadata key holding the client-computed SHA-256 (lowercase hex).
pub const META_CHECKSUM: &str = "checksum";

/// Builds the canonical upload URI for an upload id.
pub fn upload_uri(id: &str) -> String {
    format!("{}/{}", FILES_ROOT, id)
}

/// Extracts the upload id (final path segment) from an upload URI.
pub fn upload_id(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Webhook document POSTed once an upload has been promoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionNotice {
    #[serde(rename = "uploadURI")]
    pub upload_uri: String,

    #[serde(rename = "fileName")]
    pub file_name: String,

    #[serde(rename = "totalSize")]
    pub total_size: i64,

    pub status: String,

    #[serde(rename = "objectKey")]
    pub object_key: Option<String>,

    #[serde(rename = "checksumVerified")]
    pub checksum_verified: bool,
}

/// Progress projection returned by the progress API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgress {
    #[serde(rename = "uploadURI")]
    pub upload_uri: String,

    #[serde(rename = "fileName")]
    pub file_name: String,

    #[serde(rename = "totalSize")]
    pub total_size: i64,

    pub offset: i64,

    pub status: String,

    #[serde(rename = "objectKey")]
    pub object_key: Option<String>,

    #[serde(rename = "checksumVerified")]
    pub checksum_verified: bool,

    #[serde(rename = "callbackSent")]
    pub callback_sent: bool,

    /// Percentage of received bytes, rounded to two decimal places.
    pub percent: f64,
}

/// Computes the progress percentage, rounded to two decimals.
///
/// A zero-length upload reports 0 rather than dividing by zero.
pub fn percent(offset: i64, total_size: i64) -> f64 {
    if total_size <= 0 {
        return 0.0;
    }
    let raw = offset as f64 / total_size as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
