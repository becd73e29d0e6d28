//! Client configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Byte count parsed from a plain number or a human-readable size such as
/// `3MiB`, `64MB` or `512K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl FromStr for ByteSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Ok(bytes) = s.parse::<u64>() {
            return Ok(Self(bytes));
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| anyhow!("invalid size: {}", s))?;
        let (number, unit) = s.split_at(split);

        let number: f64 = number
            .parse()
            .with_context(|| format!("invalid number in size: {}", s))?;

        let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
            "B" => 1,
            "K" | "KIB" => 1 << 10,
            "M" | "MIB" => 1 << 20,
            "G" | "GIB" => 1 << 30,
            "KB" => 1_000,
            "MB" => 1_000_000,
            "GB" => 1_000_000_000,
            other => return Err(anyhow!("unknown size unit: {}", other)),
        };

        Ok(Self((number * multiplier as f64) as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClientConfig {
    /// Base URL of the server.
    pub endpoint: String,

    /// Bytes per PATCH request.
    pub chunk_size: ByteSize,

    /// Path of the fingerprint → upload-URL store.
    pub location_store: Option<PathBuf>,

    pub retry: RetryConfig,

    /// Uploads allowed in flight at once in batch mode.
    pub max_concurrent: usize,

    /// Worker tasks draining the batch queue.
    pub worker_count: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            chunk_size: ByteSize(3 * 1024 * 1024),
            location_store: None,
            retry: RetryConfig::default(),
            max_concurrent: 3,
            worker_count: 5,
        }
    }
}

impl ClientConfig {
    pub fn location_store_path(&self) -> PathBuf {
        self.location_store
            .clone()
            .unwrap_or_else(|| PathBuf::from(".tusk/locations.json"))
    }
}

/// Per-chunk retry policy with exponential backoff.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (zero-based), capped at the
    /// configured maximum.
    pub fn delay(&self, attempt: usize) -> Duration {
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(scaled.min(self.max_delay_ms as f64) as u64)
    }
}

/// Loads the configuration file, or the defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration from {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing configuration at {}", path.display()))
}
