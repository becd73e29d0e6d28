//! Local staging store.
//!
//! One append-only file per upload id under the staging directory. The
//! length of a staging file always equals the persisted offset of its
//! session, and writes happen only at that position.
//!
//! Appends on the same id must be serialized: callers take the per-id lock
//! via [`StagingStore::lock`] and hold it across the whole
//! read-offset/write/persist cycle, so two racing appends can never
//! interleave and at most one of them observes a matching offset.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug)]
pub struct StagingStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StagingStore {
    /// Opens the store, creating the staging directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Acquires the exclusive per-upload lock.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        lock.lock_owned().await
    }

    /// Filesystem path of a staging file.
    pub fn path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Creates an empty staging file. Fails if the id is already in use.
    pub async fn create(&self, id: &str) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path(id))
            .await?;

        Ok(())
    }

    /// Appends up to `limit` bytes from `reader`, starting at exactly
    /// `offset`. Returns the number of bytes written; anything the reader
    /// yields beyond `limit` is left unconsumed.
    pub async fn append_at<R>(
        &self,
        id: &str,
        offset: u64,
        reader: R,
        limit: u64,
    ) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = OpenOptions::new().write(true).open(self.path(id)).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut limited = reader.take(limit);
        let written = tokio::io::copy(&mut limited, &mut file).await?;
        file.flush().await?;

        Ok(written)
    }

    /// Current length of a staging file.
    pub async fn len(&self, id: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.path(id)).await?.len())
    }

    /// Opens a staging file for reading. Reads may run concurrently with an
    /// in-flight append; bytes up to the last completed append are visible.
    pub async fn open(&self, id: &str) -> io::Result<File> {
        File::open(self.path(id)).await
    }

    /// Deletes a staging file. A missing file is not an error.
    pub async fn remove(&self, id: &str) -> io::Result<()> {
        match fs::remove_file(self.path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        self.locks.lock().await.remove(id);
        Ok(())
    }
}

/// Reads the full content of a staging file, mainly for verification.
pub async fn read_to_vec(store: &StagingStore, id: &str) -> io::Result<Vec<u8>> {
    let mut file = store.open(id).await?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer).await?;
    Ok(buffer)
}
