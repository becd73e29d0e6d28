//! Batch upload executor.
//!
//! Files are queued onto a channel and drained by a fixed pool of worker
//! tasks; a semaphore independently bounds how many uploads run at once,
//! with the permit held around each file's whole upload lifecycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_channel as channel;
use indicatif::MultiProgress;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{spawn, JoinHandle};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::location_store::LocationStore;
use crate::uploader;

type JobSender = channel::Sender<PathBuf>;
type JobReceiver = channel::Receiver<PathBuf>;

/// Tracks counters during a batch run.
#[derive(Debug, Default)]
struct BatchStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    errors: Mutex<Vec<(String, String)>>,
}

/// Aggregate result of a batch run.
#[derive(Debug)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<(String, String)>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn print(&self) {
        eprintln!();

        if self.failed == 0 {
            eprintln!(
                "Batch complete in {:.1}s: {} uploaded",
                self.elapsed.as_secs_f64(),
                self.completed
            );
        } else {
            eprintln!(
                "Batch complete in {:.1}s: {} uploaded, {} failed",
                self.elapsed.as_secs_f64(),
                self.completed,
                self.failed
            );
            for (path, error) in &self.errors {
                eprintln!("  {}: {}", path, error);
            }
        }
    }
}

/// A handle to upload a set of files concurrently.
pub struct BatchUploader {
    sender: JobSender,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<BatchStats>,
    started: Instant,
}

impl BatchUploader {
    pub fn new(api: ApiClient, store: Arc<LocationStore>, config: Arc<ClientConfig>) -> Self {
        let (sender, receiver) = channel::unbounded();
        let stats = Arc::new(BatchStats::default());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        let mp = MultiProgress::new();
        let mut workers = Vec::new();

        for _ in 0..config.worker_count {
            workers.push(spawn(Self::worker(
                receiver.clone(),
                api.clone(),
                store.clone(),
                config.clone(),
                semaphore.clone(),
                stats.clone(),
                mp.clone(),
            )));
        }

        Self {
            sender,
            workers,
            stats,
            started: Instant::now(),
        }
    }

    /// Queues a file to be uploaded.
    pub async fn queue(&self, path: PathBuf) -> Result<()> {
        self.sender.send(path).await.map_err(|e| anyhow!(e))
    }

    /// Waits for every queued upload to finish and reports the outcome.
    pub async fn wait(mut self) -> BatchSummary {
        // Take the sender to close the channel.
        let sender = std::mem::replace(&mut self.sender, channel::unbounded().0);
        drop(sender);

        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            let _ = worker.await;
        }

        let errors = std::mem::take(&mut *self.stats.errors.lock().await);

        BatchSummary {
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            errors,
            elapsed: self.started.elapsed(),
        }
    }

    async fn worker(
        receiver: JobReceiver,
        api: ApiClient,
        store: Arc<LocationStore>,
        config: Arc<ClientConfig>,
        semaphore: Arc<Semaphore>,
        stats: Arc<BatchStats>,
        mp: MultiProgress,
    ) {
        loop {
            let path = match receiver.recv().await {
                Ok(path) => path,
                Err(_) => {
                    // channel is closed - we are done
                    break;
                }
            };

            // The permit spans the file's whole upload lifecycle.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let display = path.display().to_string();
            let result = uploader::upload_file(&api, &store, &config, &path, mp.clone()).await;

            match result {
                Ok(_) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    let message = format!("{:#}", e);
                    mp.suspend(|| {
                        eprintln!("failed: {}: {}", display, message);
                    });
                    stats.errors.lock().await.push((display, message));
                }
            }

            drop(permit);
        }
    }
}
