use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::config::{EmptyUploadPolicy, UploadConfig};
use super::error::{Error, RemoteError, Result};
use super::partition::{Part, Partitioner};
use super::remote::{MultipartId, PartReceipt, RemoteStorage};
use super::worker::{Job, Outcome, WorkResult, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Open,
    /// A part failed for good or a write did not finish; only `close` or
    /// `abort` are accepted.
    Aborting,
    Completed,
    Aborted,
}

/// Streams bytes into one multipart upload.
///
/// ```ignore
/// let mut session = UploadSession::new(remote, "backups/disk.img", UploadConfig::default())?;
/// session.open().await?;
/// session.write(&chunk).await?;
/// session.close().await?;
/// ```
///
/// A session that fails in `write` must still be finished with `close` or
/// `abort` so the remote upload is not left dangling.
pub struct UploadSession {
    remote: Arc<dyn RemoteStorage>,
    key: String,
    config: UploadConfig,
    state: SessionState,
    running: Option<Running>,
    bytes_written: u64,
}

/// Everything that exists only between `open` and `close`/`abort`.
struct Running {
    id: Arc<MultipartId>,
    started: Instant,
    partitioner: Partitioner,
    jobs: async_channel::Sender<Job>,
    results: mpsc::UnboundedReceiver<WorkResult>,
    cancel: Arc<watch::Sender<bool>>,
    pool: WorkerPool,
    max_parts: Option<usize>,
    receipts: Vec<PartReceipt>,
    failure: Option<PartFailure>,
    dispatched: usize,
    reported: usize,
}

#[derive(Debug, Clone)]
struct PartFailure {
    part_number: i32,
    attempts: u32,
    source: Arc<RemoteError>,
}

impl PartFailure {
    fn to_error(&self) -> Error {
        Error::UploadFailed {
            part_number: self.part_number,
            attempts: self.attempts,
            source: Arc::clone(&self.source),
        }
    }
}

impl UploadSession {
    pub fn new(
        remote: Arc<dyn RemoteStorage>,
        key: impl Into<String>,
        config: UploadConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            remote,
            key: key.into(),
            config,
            state: SessionState::Idle,
            running: None,
            bytes_written: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes accepted by `write` so far, including those still buffered.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.id.upload_id.as_str())
    }

    /// Initiates the remote multipart upload and starts the worker pool.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn open(&mut self) -> Result<()> {
        self.expect_state("open", &[SessionState::Idle])?;

        let id = self
            .remote
            .initiate(&self.key)
            .await
            .map_err(|source| Error::Session {
                operation: "initiate",
                source,
            })?;
        info!(upload_id = %id.upload_id, "multipart upload initiated");
        let id = Arc::new(id);

        let (jobs, jobs_rx) = async_channel::bounded(self.config.queue_capacity);
        let (results_tx, results) = mpsc::unbounded_channel();
        let cancel = Arc::new(watch::channel(false).0);
        let pool = WorkerPool::spawn(
            Arc::clone(&self.remote),
            Arc::clone(&id),
            &self.config,
            jobs_rx,
            results_tx,
            Arc::clone(&cancel),
        );
        debug!(
            workers = pool.len(),
            part_size = self.config.part_size,
            "upload workers started"
        );

        self.running = Some(Running {
            id,
            started: Instant::now(),
            partitioner: Partitioner::new(self.config.part_size),
            jobs,
            results,
            cancel,
            pool,
            max_parts: self.remote.max_parts(),
            receipts: Vec::new(),
            failure: None,
            dispatched: 0,
            reported: 0,
        });
        self.state = SessionState::Open;
        Ok(())
    }

    /// Buffers `data` and queues every part it completes. Waits while the
    /// dispatch queue is full.
    ///
    /// Fails with [`Error::UploadFailed`] as soon as any part has exhausted its
    /// retries; the session is then `Aborting`.
    ///
    /// Not cancel safe: dropping the returned future leaves the session
    /// `Aborting`, because part of `data` may already be cut into parts.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.expect_state("write", &[SessionState::Open])?;
        let Some(running) = self.running.as_mut() else {
            return Err(self.violation("write"));
        };

        // back to Open only once every byte of `data` is accounted for
        self.state = SessionState::Aborting;
        running.write(data).await?;
        self.state = SessionState::Open;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Uploads the buffered remainder, waits for every part and completes the
    /// upload, or aborts it if any part failed.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn close(&mut self) -> Result<()> {
        self.expect_state("close", &[SessionState::Open, SessionState::Aborting])?;
        let Some(mut running) = self.running.take() else {
            return Err(self.violation("close"));
        };

        let flushed = match self.state {
            SessionState::Open => running.flush(self.config.empty_upload).await,
            _ => Ok(()),
        };
        let drained = running.shutdown().await;

        let interrupted = self.state == SessionState::Aborting;
        let verdict = flushed
            .and(drained)
            .and_then(|()| running.check())
            .and_then(|()| running.within_limit())
            .and_then(|()| {
                if interrupted {
                    Err(Error::WriteInterrupted)
                } else {
                    Ok(())
                }
            })
            .and_then(|()| running.completed_parts(self.config.empty_upload));
        let parts = match verdict {
            Ok(parts) => parts,
            Err(cause) => return Err(self.abort_remote(&running.id, cause).await),
        };

        let count = parts.len();
        if let Err(source) = self.remote.complete(&running.id, parts).await {
            let cause = Error::Session {
                operation: "complete",
                source,
            };
            return Err(self.abort_remote(&running.id, cause).await);
        }

        self.state = SessionState::Completed;
        info!(
            upload_id = %running.id.upload_id,
            parts = count,
            bytes = self.bytes_written,
            elapsed = ?running.started.elapsed(),
            "multipart upload completed"
        );
        Ok(())
    }

    /// Cancels the upload: queued parts are skipped, in-flight parts finish,
    /// then the remote upload is aborted and every stored part discarded.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn abort(&mut self) -> Result<()> {
        self.expect_state("abort", &[SessionState::Open, SessionState::Aborting])?;
        let Some(mut running) = self.running.take() else {
            return Err(self.violation("abort"));
        };

        running.cancel();
        let drained = running.shutdown().await;
        self.state = SessionState::Aborted;

        self.remote
            .abort(&running.id)
            .await
            .map_err(|source| Error::Session {
                operation: "abort",
                source,
            })?;
        info!(upload_id = %running.id.upload_id, "multipart upload aborted");
        drained
    }

    /// Aborts the remote upload on behalf of a failed close and returns the
    /// error to report.
    async fn abort_remote(&mut self, id: &MultipartId, cause: Error) -> Error {
        self.state = SessionState::Aborted;
        error!(upload_id = %id.upload_id, error = %cause, "aborting multipart upload");
        match self.remote.abort(id).await {
            Ok(()) => cause,
            Err(source) => Error::AbortFailed {
                cause: Box::new(cause),
                source,
            },
        }
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.violation(operation))
        }
    }

    fn violation(&self, operation: &'static str) -> Error {
        Error::ProtocolViolation {
            operation,
            state: self.state,
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel();
            warn!(
                key = %self.key,
                upload_id = %running.id.upload_id,
                "upload session dropped without close or abort, remote upload left open"
            );
        }
    }
}

impl Running {
    async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        self.poll()?;
        while !data.is_empty() {
            if let Some(part) = self.partitioner.fill(&mut data) {
                self.dispatch(part).await?;
            }
        }
        self.poll()
    }

    async fn flush(&mut self, policy: EmptyUploadPolicy) -> Result<()> {
        let emit_empty = policy == EmptyUploadPolicy::SinglePart;
        match self.partitioner.finish(emit_empty) {
            Some(part) => self.dispatch(part).await,
            None => Ok(()),
        }
    }

    async fn dispatch(&mut self, part: Part) -> Result<()> {
        // nothing new goes out once a part has failed
        self.poll()?;
        self.within_limit()?;

        let part_number = part.number;
        debug!(part = part_number, bytes = part.len(), range = ?part.range, "queueing part");
        let jobs = self.jobs.clone();
        let send = jobs.send(Job::Upload(part));
        tokio::pin!(send);
        loop {
            tokio::select! {
                sent = &mut send => {
                    if sent.is_err() {
                        // every worker has exited; the collector says why
                        self.drain().await;
                        self.check()?;
                        return Err(Error::WorkersGone { part_number });
                    }
                    self.dispatched += 1;
                    return Ok(());
                }
                Some(result) = self.results.recv() => {
                    // a fatal result abandons the part still waiting for room
                    self.record(result);
                    self.check()?;
                }
            }
        }
    }

    /// Fails once more parts were cut than the remote accepts.
    fn within_limit(&self) -> Result<()> {
        match self.max_parts {
            Some(limit) if self.partitioner.parts_emitted() > limit => {
                Err(Error::TooManyParts { limit })
            }
            _ => Ok(()),
        }
    }

    /// Records every result already posted without waiting.
    fn poll(&mut self) -> Result<()> {
        while let Ok(result) = self.results.try_recv() {
            self.record(result);
        }
        self.check()
    }

    /// Receives results until every worker has dropped its sender.
    async fn drain(&mut self) {
        while let Some(result) = self.results.recv().await {
            self.record(result);
        }
    }

    fn record(&mut self, result: WorkResult) {
        self.reported += 1;
        match result.outcome {
            Outcome::Uploaded(receipt) => self.receipts.push(receipt),
            Outcome::Failed { attempts, error } => {
                error!(
                    part = result.part_number,
                    attempts,
                    %error,
                    "part upload failed, giving up"
                );
                if self.failure.is_none() {
                    self.failure = Some(PartFailure {
                        part_number: result.part_number,
                        attempts,
                        source: Arc::new(error),
                    });
                    self.cancel();
                }
            }
            Outcome::Skipped => debug!(part = result.part_number, "part skipped"),
        }
    }

    fn check(&self) -> Result<()> {
        match &self.failure {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Stops the pool and waits until every dispatched part has reported and
    /// every worker has exited.
    async fn shutdown(&mut self) -> Result<()> {
        for _ in 0..self.pool.len() {
            if self.jobs.send(Job::Stop).await.is_err() {
                break;
            }
        }
        self.jobs.close();
        self.drain().await;

        self.pool.join().await?;

        if self.reported != self.dispatched {
            warn!(
                dispatched = self.dispatched,
                reported = self.reported,
                "workers exited with parts still queued"
            );
        }
        Ok(())
    }

    /// Receipts sorted by part number, once every part that was cut has been
    /// uploaded.
    fn completed_parts(&mut self, policy: EmptyUploadPolicy) -> Result<Vec<PartReceipt>> {
        let emitted = self.partitioner.parts_emitted();
        if emitted == 0 && policy == EmptyUploadPolicy::Reject {
            return Err(Error::EmptyUpload);
        }
        let mut parts = std::mem::take(&mut self.receipts);
        parts.sort_unstable_by_key(|p| p.part_number);
        match first_missing(&parts, emitted) {
            Some(part_number) => Err(Error::MissingPart { part_number }),
            None => Ok(parts),
        }
    }
}

/// First part number in `1..=emitted` without a receipt. `parts` is sorted.
fn first_missing(parts: &[PartReceipt], emitted: usize) -> Option<i32> {
    let mut numbers = parts.iter().map(|p| p.part_number);
    (1..=emitted as i32).find(|&expected| numbers.next() != Some(expected))
}
