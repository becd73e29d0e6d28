//! S3-compatible object store backend.
//!
//! Works against AWS S3 and MinIO. Path-style addressing is always enabled
//! since MinIO requires it, and credentials come from the configuration when
//! given, falling back to the SDK's environment chain otherwise.

use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::DownloadSource;
use crate::config::S3StorageConfig;
use crate::error::{ServerError, ServerResult};

#[derive(Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub fn new(config: &S3StorageConfig) -> Self {
        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .force_path_style(true);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            builder = builder.credentials_provider(Credentials::new(
                access_key.as_str(),
                secret_key.as_str(),
                None,
                None,
                "static",
            ));
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    pub async fn put_file(&self, key: &str, path: &Path, size: i64) -> ServerResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(ServerError::remote_store_error)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(size)
            .body(body)
            .send()
            .await
            .map_err(|e| ServerError::remote_store_error(anyhow!("put {}: {}", key, e)))?;

        Ok(())
    }

    pub async fn download(&self, key: &str, ttl: Duration) -> ServerResult<DownloadSource> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(ServerError::remote_store_error)?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| ServerError::remote_store_error(anyhow!("presign {}: {}", key, e)))?;

        Ok(DownloadSource::Redirect(presigned.uri().to_string()))
    }
}
