//! HTTP client for the tusk server.

use std::error::Error as StdError;
use std::fmt;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use const_format::formatcp;
use displaydoc::Display;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION, USER_AGENT},
    Client as HttpClient, Method, Response, StatusCode, Url,
};
use serde::Deserialize;

use tusk::api::tus::{
    HEADER_TUS_EXTENSION, HEADER_TUS_MAX_SIZE, HEADER_TUS_RESUMABLE, HEADER_TUS_VERSION,
    HEADER_UPLOAD_LENGTH, HEADER_UPLOAD_METADATA, HEADER_UPLOAD_OFFSET, META_CHECKSUM,
    META_FILENAME, OFFSET_OCTET_STREAM, TUS_VERSION,
};
use tusk::metadata;

/// The User-Agent string of the tusk client.
const TUSK_USER_AGENT: &str = formatcp!("tusk/{}", env!("CARGO_PKG_VERSION"));

/// The tusk API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Base endpoint of the server.
    endpoint: Url,

    /// An initialized HTTP client.
    client: HttpClient,
}

/// An API error.
#[derive(Debug, Display)]
pub enum ApiError {
    /// {0}
    Structured(StructuredApiError),

    /// HTTP {0}: {1}
    Unstructured(StatusCode, String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructuredApiError {
    code: u16,
    error: String,
    message: String,
}

/// Server capabilities reported by discovery.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub version: String,
    pub max_size: Option<u64>,
    pub extensions: Vec<String>,
}

impl ApiClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
        headers.insert(USER_AGENT, HeaderValue::from_static(TUSK_USER_AGENT));

        let client = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            client,
        })
    }

    /// Queries the server's protocol capabilities.
    pub async fn discover(&self) -> Result<ServerCapabilities> {
        let endpoint = self.endpoint.join("files")?;
        let res = self
            .client
            .request(Method::OPTIONS, endpoint)
            .send()
            .await?;

        if !res.status().is_success() {
            let api_error = ApiError::try_from_response(res).await?;
            return Err(api_error.into());
        }

        let header_str = |name: &str| {
            res.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        Ok(ServerCapabilities {
            version: header_str(HEADER_TUS_VERSION).unwrap_or_default(),
            max_size: header_str(HEADER_TUS_MAX_SIZE).and_then(|v| v.parse().ok()),
            extensions: header_str(HEADER_TUS_EXTENSION)
                .map(|v| v.split(',').map(str::to_owned).collect())
                .unwrap_or_default(),
        })
    }

    /// Creates an upload session and returns its absolute URL.
    pub async fn create_upload(
        &self,
        file_name: &str,
        total_size: u64,
        checksum: &str,
    ) -> Result<Url> {
        let endpoint = self.endpoint.join("files")?;
        let meta = metadata::encode([(META_FILENAME, file_name), (META_CHECKSUM, checksum)]);

        let res = self
            .client
            .post(endpoint)
            .header(HEADER_UPLOAD_LENGTH, total_size)
            .header(HEADER_UPLOAD_METADATA, meta)
            .send()
            .await?;

        if !res.status().is_success() {
            let api_error = ApiError::try_from_response(res).await?;
            return Err(api_error.into());
        }

        let location = res
            .headers()
            .get(LOCATION)
            .ok_or_else(|| anyhow!("server response has no Location header"))?
            .to_str()?;

        // The Location may be absolute or server-relative.
        match Url::parse(location) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.endpoint.join(location)?),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the server-side offset and declared length of an upload, or
    /// `None` when the server no longer knows it.
    pub async fn upload_offset(&self, url: Url) -> Result<Option<(u64, u64)>> {
        let res = self.client.head(url).send().await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !res.status().is_success() {
            let api_error = ApiError::try_from_response(res).await?;
            return Err(api_error.into());
        }

        let offset = required_u64_header(&res, HEADER_UPLOAD_OFFSET)?;
        let length = required_u64_header(&res, HEADER_UPLOAD_LENGTH)?;

        Ok(Some((offset, length)))
    }

    /// Transmits one chunk at `offset` and returns the new server offset.
    pub async fn append(&self, url: Url, offset: u64, chunk: Bytes) -> Result<u64> {
        let res = self
            .client
            .patch(url)
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header(HEADER_UPLOAD_OFFSET, offset)
            .body(chunk)
            .send()
            .await?;

        if !res.status().is_success() {
            let api_error = ApiError::try_from_response(res).await?;
            return Err(api_error.into());
        }

        required_u64_header(&res, HEADER_UPLOAD_OFFSET)
    }

    /// Terminates an upload, deleting its server-side state.
    pub async fn terminate(&self, url: Url) -> Result<()> {
        let res = self.client.delete(url).send().await?;

        if res.status().is_success() {
            Ok(())
        } else {
            let api_error = ApiError::try_from_response(res).await?;
            Err(api_error.into())
        }
    }
}

fn required_u64_header(res: &Response, name: &str) -> Result<u64> {
    res.headers()
        .get(name)
        .ok_or_else(|| anyhow!("server response has no {} header", name))?
        .to_str()?
        .parse()
        .map_err(|_| anyhow!("server sent a malformed {} header", name))
}

impl StdError for ApiError {}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Structured(e) => StatusCode::from_u16(e.code).ok(),
            Self::Unstructured(status, _) => Some(*status),
        }
    }

    async fn try_from_response(response: Response) -> Result<Self> {
        let status = response.status();
        let text = response.text().await?;
        match serde_json::from_str(&text) {
            Ok(s) => Ok(Self::Structured(s)),
            Err(_) => Ok(Self::Unstructured(status, text)),
        }
    }
}

impl fmt::Display for StructuredApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}
