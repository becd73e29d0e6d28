//! Server configuration.
//!
//! Loaded from a TOML file. Only the staging path, the public endpoint, the
//! database and the object store must be specified; everything else has
//! defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Socket address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Absolute base URL clients reach the server at, used to build the
    /// `Location` header on creation.
    pub api_endpoint: String,

    /// Directory holding the staging files.
    pub storage_path: PathBuf,

    /// Largest accepted `Upload-Length`, in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: i64,

    /// If non-empty, the metadata `filename` must end with one of these
    /// suffixes (case-insensitive).
    #[serde(default)]
    pub allowed_extensions: Vec<String>,

    pub database: DatabaseConfig,

    /// Object store that completed uploads are promoted to.
    pub storage: StorageConfig,

    #[serde(default)]
    pub expiration: ExpirationConfig,

    #[serde(default)]
    pub callback: CallbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `sqlite:///var/lib/tusk/tusk.db?mode=rwc`.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum StorageConfig {
    Local(LocalStorageConfig),
    S3(S3StorageConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocalStorageConfig {
    /// Directory promoted objects are copied into.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct S3StorageConfig {
    pub region: String,
    pub bucket: String,

    /// Custom endpoint for MinIO and other S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExpirationConfig {
    /// Whether the sweeper runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long an `uploading` session may stay idle before it expires.
    #[serde(default = "default_expiration_timeout")]
    pub timeout_secs: u64,

    /// How often the sweeper runs.
    #[serde(default = "default_expiration_interval")]
    pub interval_secs: u64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_expiration_timeout(),
            interval_secs: default_expiration_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CallbackConfig {
    /// Whether a webhook is fired after promotion.
    #[serde(default)]
    pub enabled: bool,

    /// URL the completion notice is POSTed to.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

fn default_max_upload_size() -> i64 {
    1024 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_expiration_timeout() -> u64 {
    24 * 60 * 60
}

fn default_expiration_interval() -> u64 {
    60 * 60
}

/// Loads the configuration from a TOML file.
pub fn load(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration from {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing configuration at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            api-endpoint = "http://localhost:8080"
            storage-path = "/tmp/tusk/staging"

            [database]
            url = "sqlite::memory:"

            [storage]
            type = "local"
            path = "/tmp/tusk/objects"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_upload_size, 1024 * 1024 * 1024);
        assert!(config.allowed_extensions.is_empty());
        assert!(config.expiration.enabled);
        assert_eq!(config.expiration.timeout_secs, 86400);
        assert_eq!(config.expiration.interval_secs, 3600);
        assert!(!config.callback.enabled);
    }

    #[test]
    fn test_s3_storage_config() {
        let config: Config = toml::from_str(
            r#"
            api-endpoint = "http://upload.example.com"
            storage-path = "/srv/staging"
            max-upload-size = 1024

            [database]
            url = "postgres://tusk@localhost/tusk"

            [storage]
            type = "s3"
            region = "us-east-1"
            bucket = "uploads"
            endpoint = "http://minio:9000"
            access-key-id = "minioadmin"
            secret-access-key = "minioadmin"
            "#,
        )
        .unwrap();

        match config.storage {
            StorageConfig::S3(s3) => {
                assert_eq!(s3.bucket, "uploads");
                assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
            }
            _ => panic!("expected s3 storage"),
        }
    }
}
