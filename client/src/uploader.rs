//! Single-file resumable upload driver.
//!
//! Drives the whole protocol for one file: hash it, look the fingerprint up
//! in the location store, resume from the server offset when a usable
//! session exists, otherwise create a fresh one, then push chunks until the
//! declared length is reached. Each chunk is retried with exponential
//! backoff; a 409 re-synchronizes against the server offset instead of
//! counting as a retry.

use std::fmt::Write;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressState, ProgressStyle};
use reqwest::{StatusCode, Url};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use tusk::checksum;

use crate::api::{ApiClient, ApiError};
use crate::config::{ClientConfig, RetryConfig};
use crate::fingerprint::fingerprint;
use crate::location_store::LocationStore;

/// Outcome of a single file upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Bytes were transmitted in this run.
    Completed,

    /// The server already had every byte for this fingerprint.
    AlreadyComplete,
}

/// Uploads one file, resuming a previous session where possible.
pub async fn upload_file(
    api: &ApiClient,
    store: &LocationStore,
    config: &ClientConfig,
    path: &Path,
    mp: MultiProgress,
) -> Result<UploadOutcome> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", path.display());
    }

    let total_size = meta.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;

    let digest = checksum::sha256_hex(File::open(path).await?).await?;
    let key = fingerprint(path, total_size);

    // Try to resume a previous session for this fingerprint.
    let mut session = None;
    if let Some(url) = store.get(&key).await? {
        match api.upload_offset(url.clone()).await? {
            Some((offset, length)) if length == total_size => {
                if offset >= total_size {
                    info!(%url, "server already has every byte");
                    store.remove(&key).await?;
                    return Ok(UploadOutcome::AlreadyComplete);
                }

                info!(%url, offset, "resuming upload");
                session = Some((url, offset));
            }
            Some((_, length)) => {
                // The file changed size since the session was created.
                debug!(%url, length, total_size, "declared length differs, starting over");
                store.remove(&key).await?;
            }
            None => {
                debug!(%url, "server no longer knows this session");
                store.remove(&key).await?;
            }
        }
    }

    let (url, mut offset) = match session {
        Some(session) => session,
        None => {
            let url = api.create_upload(&file_name, total_size, &digest).await?;
            store.put(&key, &url).await?;
            (url, 0)
        }
    };

    let bar = make_progress_bar(&mp, &file_name, total_size);
    bar.set_position(offset);

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let chunk_size = config.chunk_size.0;

    while offset < total_size {
        let want = chunk_size.min(total_size - offset) as usize;
        let mut buffer = vec![0u8; want];
        file.read_exact(&mut buffer).await?;
        let chunk = Bytes::from(buffer);

        match append_with_retry(api, &url, offset, chunk, &config.retry).await? {
            AppendResult::Advanced(new_offset) => {
                offset = new_offset;
            }
            AppendResult::OffsetDrift(server_offset) => {
                // Trust the server and reposition the file cursor.
                warn!(
                    client = offset,
                    server = server_offset,
                    "offset drift, re-synchronizing"
                );
                offset = server_offset;
                file.seek(SeekFrom::Start(offset)).await?;
            }
        }

        bar.set_position(offset);
    }

    bar.finish_and_clear();
    store.remove(&key).await?;

    info!(%url, total_size, "upload complete");
    Ok(UploadOutcome::Completed)
}

enum AppendResult {
    /// The chunk was acknowledged; the server is now at this offset.
    Advanced(u64),

    /// The server reported a conflicting offset; continue from there.
    OffsetDrift(u64),
}

async fn append_with_retry(
    api: &ApiClient,
    url: &Url,
    offset: u64,
    chunk: Bytes,
    retry: &RetryConfig,
) -> Result<AppendResult> {
    let mut attempt = 0;

    loop {
        match api.append(url.clone(), offset, chunk.clone()).await {
            Ok(new_offset) => return Ok(AppendResult::Advanced(new_offset)),
            Err(e) => {
                if is_offset_conflict(&e) {
                    let (server_offset, _) = api
                        .upload_offset(url.clone())
                        .await?
                        .ok_or_else(|| anyhow!("session disappeared during conflict recovery"))?;
                    return Ok(AppendResult::OffsetDrift(server_offset));
                }

                attempt += 1;
                if attempt >= retry.max_attempts {
                    return Err(e.context(format!(
                        "chunk at offset {} failed after {} attempts",
                        offset, attempt
                    )));
                }

                let delay = retry.delay(attempt - 1);
                warn!(
                    offset,
                    attempt,
                    max = retry.max_attempts,
                    "chunk failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn is_offset_conflict(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ApiError>()
        .and_then(ApiError::status)
        .map(|status| status == StatusCode::CONFLICT)
        .unwrap_or(false)
}

fn make_progress_bar(mp: &MultiProgress, name: &str, total_size: u64) -> ProgressBar {
    let bar = mp.add(ProgressBar::new(total_size));

    let template = format!(
        "{{spinner}} {: <20.20} {{bar:40.green/blue}} {{human_bytes:10}} ({{average_speed}})",
        name,
    );
    if let Ok(style) = ProgressStyle::with_template(&template) {
        let style = style
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏✓")
            .progress_chars("━━─")
            .with_key("human_bytes", |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "{}", HumanBytes(state.pos()));
            })
            .with_key(
                "average_speed",
                |state: &ProgressState, w: &mut dyn Write| match (state.pos(), state.elapsed()) {
                    (pos, elapsed) if elapsed > Duration::ZERO => {
                        let _ = write!(w, "{}", average_speed(pos, elapsed));
                    }
                    _ => {
                        let _ = write!(w, "-");
                    }
                },
            );
        bar.set_style(style);
    }

    bar
}

// Just the average, no fancy sliding windows that cause wild fluctuations
// <https://github.com/console-rs/indicatif/issues/394>
fn average_speed(bytes: u64, duration: Duration) -> String {
    let speed = bytes as f64 * 1000_f64 / duration.as_millis() as f64;
    format!("{}/s", HumanBytes(speed as u64))
}
