use std::time::Duration;

use super::error::{Error, Result};

/// 64 MiB.
pub const DEFAULT_PART_SIZE: usize = 67_108_864;
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_RETRY_LIMIT: u32 = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 2;

/// What to do when the stream ends without a single byte written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyUploadPolicy {
    /// Upload one empty part so the object is created with zero length.
    #[default]
    SinglePart,
    /// Abort the remote session and fail with [`Error::EmptyUpload`].
    Reject,
}

/// Tuning for an [`UploadSession`](super::UploadSession).
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub part_size: usize,
    pub workers: usize,
    /// Attempts per part, including the first one.
    pub retry_limit: u32,
    pub queue_capacity: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Deadline for a single part upload attempt. Expiry counts as a failed attempt.
    pub attempt_timeout: Option<Duration>,
    pub empty_upload: EmptyUploadPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            workers: DEFAULT_WORKERS,
            retry_limit: DEFAULT_RETRY_LIMIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(10),
            attempt_timeout: None,
            empty_upload: EmptyUploadPolicy::default(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            return Err(Error::InvalidConfig("part size must be positive".into()));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("worker count must be positive".into()));
        }
        if self.retry_limit == 0 {
            return Err(Error::InvalidConfig("retry limit must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacity must be positive".into()));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::InvalidConfig(format!(
                "backoff max {:?} is below backoff base {:?}",
                self.backoff_max, self.backoff_base
            )));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based count of failed attempts so far).
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |delay| delay.min(self.backoff_max))
    }
}
