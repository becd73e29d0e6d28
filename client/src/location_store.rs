//! Durable fingerprint → upload-URL store.
//!
//! A small JSON file mapping each file fingerprint to the upload URL the
//! server issued for it, so an interrupted upload can resume in a later
//! process. Writes go through a temp file and an atomic rename.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLocation {
    pub upload_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct LocationStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredLocation>>,
}

impl LocationStore {
    /// Opens the store, loading any existing entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("corrupt location store at {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading location store at {}", path.display()))
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Records (or refreshes) the upload URL for a fingerprint.
    pub async fn put(&self, fingerprint: &str, url: &Url) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();

        entries
            .entry(fingerprint.to_string())
            .and_modify(|entry| {
                entry.upload_url = url.to_string();
                entry.updated_at = now;
            })
            .or_insert_with(|| StoredLocation {
                upload_url: url.to_string(),
                created_at: now,
                updated_at: now,
            });

        self.persist(&entries)
    }

    /// Looks up the stored URL for a fingerprint.
    ///
    /// An entry whose URL no longer parses is dropped on the spot and `None`
    /// is returned, forcing a fresh upload.
    pub async fn get(&self, fingerprint: &str) -> Result<Option<Url>> {
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get(fingerprint) else {
            return Ok(None);
        };

        match Url::parse(&entry.upload_url) {
            Ok(url) => Ok(Some(url)),
            Err(_) => {
                tracing::warn!(fingerprint, "stored upload URL does not parse, dropping");
                entries.remove(fingerprint);
                self.persist(&entries)?;
                Ok(None)
            }
        }
    }

    /// Forgets a fingerprint.
    pub async fn remove(&self, fingerprint: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;

        if entries.remove(fingerprint).is_some() {
            self.persist(&entries)?;
        }

        Ok(())
    }

    fn persist(&self, entries: &HashMap<String, StoredLocation>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}
