//! Background removal of on-disk artifacts left by deleted accounts.

use std::path::PathBuf;

use {
    tokio::{
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

use wahub_whatsapp::device_store::remove_artifact;

#[derive(Debug)]
pub enum CleanupJob {
    RemovePath { account_id: String, path: PathBuf },
    /// Resolves once every job queued before it has been attempted.
    Flush(oneshot::Sender<()>),
}

/// Handle to the cleanup worker. Each job is attempted exactly once and a
/// failure is only logged.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<CleanupJob>,
}

impl CleanupQueue {
    /// Start the worker. It exits once every queue handle is dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<CleanupJob>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    CleanupJob::RemovePath { account_id, path } => {
                        match remove_artifact(&path).await {
                            Ok(()) => {
                                debug!(account_id = %account_id, path = %path.display(), "artifact removed");
                            },
                            Err(e) => {
                                warn!(
                                    account_id = %account_id,
                                    path = %path.display(),
                                    error = %e,
                                    "failed to remove account artifact"
                                );
                            },
                        }
                    },
                    CleanupJob::Flush(done) => {
                        let _ = done.send(());
                    },
                }
            }
        });
        (Self { tx }, worker)
    }

    pub fn remove_paths(&self, account_id: &str, paths: impl IntoIterator<Item = PathBuf>) {
        for path in paths {
            let job = CleanupJob::RemovePath {
                account_id: account_id.to_string(),
                path,
            };
            if self.tx.send(job).is_err() {
                warn!(account_id, "cleanup worker is gone, artifact left on disk");
            }
        }
    }

    /// Wait for previously queued jobs.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(CleanupJob::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}
