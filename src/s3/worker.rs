use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::UploadConfig;
use super::error::RemoteError;
use super::partition::Part;
use super::remote::{MultipartId, PartReceipt, RemoteStorage};

/// Item on the dispatch queue.
#[derive(Debug)]
pub(crate) enum Job {
    Upload(Part),
    Stop,
}

#[derive(Debug)]
pub(crate) struct WorkResult {
    pub(crate) part_number: i32,
    pub(crate) outcome: Outcome,
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Uploaded(PartReceipt),
    /// Last error after every attempt failed.
    Failed { attempts: u32, error: RemoteError },
    /// Dequeued or abandoned after the session was cancelled.
    Skipped,
}

/// Fixed set of tokio tasks uploading parts from a shared queue.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        remote: Arc<dyn RemoteStorage>,
        id: Arc<MultipartId>,
        config: &UploadConfig,
        jobs: async_channel::Receiver<Job>,
        results: mpsc::UnboundedSender<WorkResult>,
        cancel: Arc<watch::Sender<bool>>,
    ) -> Self {
        let handles = (0..config.workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    remote: Arc::clone(&remote),
                    id: Arc::clone(&id),
                    config: config.clone(),
                    cancel: Arc::clone(&cancel),
                };
                tokio::spawn(worker.run(jobs.clone(), results.clone()))
            })
            .collect();
        Self { handles }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker to exit.
    pub(crate) async fn join(&mut self) -> Result<(), tokio::task::JoinError> {
        for handle in self.handles.drain(..) {
            handle.await?;
        }
        Ok(())
    }
}

struct Worker {
    index: usize,
    remote: Arc<dyn RemoteStorage>,
    id: Arc<MultipartId>,
    config: UploadConfig,
    /// Shared with the session; either side may raise it.
    cancel: Arc<watch::Sender<bool>>,
}

impl Worker {
    async fn run(
        self,
        jobs: async_channel::Receiver<Job>,
        results: mpsc::UnboundedSender<WorkResult>,
    ) {
        while let Ok(job) = jobs.recv().await {
            let part = match job {
                Job::Upload(part) => part,
                Job::Stop => break,
            };

            let outcome = if self.is_cancelled() {
                debug!(
                    worker = self.index,
                    part = part.number,
                    "session cancelled, skipping part"
                );
                Outcome::Skipped
            } else {
                self.upload(&part).await
            };
            let fatal = matches!(outcome, Outcome::Failed { .. });
            if fatal {
                // stop the other workers before the session gets to read the result
                self.cancel.send_replace(true);
            }

            let result = WorkResult {
                part_number: part.number,
                outcome,
            };
            if results.send(result).is_err() || fatal {
                break;
            }
        }
        debug!(worker = self.index, "upload worker exiting");
    }

    async fn upload(&self, part: &Part) -> Outcome {
        let limit = self.config.retry_limit;
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                worker = self.index,
                part = part.number,
                attempt,
                bytes = part.len(),
                "uploading part"
            );

            let error = match self.attempt(part).await {
                Ok(receipt) => {
                    debug!(worker = self.index, part = part.number, attempt, "part uploaded");
                    return Outcome::Uploaded(receipt);
                }
                Err(error) if attempt >= limit => {
                    return Outcome::Failed {
                        attempts: attempt,
                        error,
                    }
                }
                Err(error) => error,
            };

            warn!(part = part.number, attempt, limit, %error, "part upload failed, retrying");
            tokio::time::sleep(self.config.backoff(attempt)).await;
            if self.is_cancelled() {
                return Outcome::Skipped;
            }
        }
    }

    async fn attempt(&self, part: &Part) -> Result<PartReceipt, RemoteError> {
        let upload = self.remote.upload_part(&self.id, part);
        match self.config.attempt_timeout {
            Some(deadline) => tokio::time::timeout(deadline, upload)
                .await
                .unwrap_or(Err(RemoteError::Timeout(deadline))),
            None => upload.await,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}
