//! Local directory object store.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tokio::fs;

use super::DownloadSource;
use crate::error::{ServerError, ServerResult};

#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Object keys are `<uploadId>/<fileName>`; the id becomes a directory.
    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub async fn put_file(&self, key: &str, path: &Path) -> ServerResult<()> {
        let dest = self.object_path(key);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(ServerError::remote_store_error)?;
        }

        fs::copy(path, &dest)
            .await
            .map_err(ServerError::remote_store_error)?;

        Ok(())
    }

    pub async fn download(&self, key: &str) -> ServerResult<DownloadSource> {
        let path = self.object_path(key);

        match fs::metadata(&path).await {
            Ok(_) => Ok(DownloadSource::LocalFile(path)),
            Err(_) => Err(ServerError::remote_store_error(anyhow!(
                "object not found: {}",
                key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_resolve() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().join("objects")).await.unwrap();

        let source = dir.path().join("payload");
        fs::write(&source, b"object bytes").await.unwrap();

        backend.put_file("abc123/test.txt", &source).await.unwrap();

        match backend.download("abc123/test.txt").await.unwrap() {
            DownloadSource::LocalFile(path) => {
                assert_eq!(fs::read(path).await.unwrap(), b"object bytes");
            }
            other => panic!("unexpected source: {:?}", other),
        }

        assert!(backend.download("missing/key").await.is_err());
    }
}
