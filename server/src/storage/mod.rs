//! Object storage backends.
//!
//! Completed uploads are promoted here as single objects. Two backends are
//! supported: an S3-compatible store (AWS, MinIO) and a plain directory for
//! single-box deployments and tests.

pub mod local;
pub mod s3;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::config::StorageConfig;
use crate::error::ServerResult;

pub use local::LocalBackend;
pub use s3::S3Backend;

/// Where a download of a promoted object is served from.
#[derive(Debug)]
pub enum DownloadSource {
    /// Redirect the client to this presigned URL.
    Redirect(String),

    /// Stream the object from this local path.
    LocalFile(PathBuf),
}

#[derive(Debug)]
pub enum ObjectStoreBackend {
    Local(LocalBackend),
    S3(S3Backend),
}

impl ObjectStoreBackend {
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        match config {
            StorageConfig::Local(local) => {
                Ok(Self::Local(LocalBackend::new(local.path.clone()).await?))
            }
            StorageConfig::S3(s3) => Ok(Self::S3(S3Backend::new(s3))),
        }
    }

    /// Stores the file at `path` under `key` as one object of `size` bytes.
    pub async fn put_file(&self, key: &str, path: &Path, size: i64) -> ServerResult<()> {
        match self {
            Self::Local(local) => local.put_file(key, path).await,
            Self::S3(s3) => s3.put_file(key, path, size).await,
        }
    }

    /// Resolves how a stored object should be downloaded.
    pub async fn download(&self, key: &str, ttl: Duration) -> ServerResult<DownloadSource> {
        match self {
            Self::Local(local) => local.download(key).await,
            Self::S3(s3) => s3.download(key, ttl).await,
        }
    }
}
