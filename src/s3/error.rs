use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::multipart::SessionState;

/// Failure reported by the remote storage service for a single request.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    S3(#[from] aws_sdk_s3::Error),

    #[error("response is missing {0}")]
    MissingField(&'static str),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by an [`UploadSession`](super::UploadSession).
#[derive(Debug, Error)]
pub enum Error {
    /// The remote multipart session could not be initiated, completed or aborted.
    #[error("failed to {operation} multipart upload")]
    Session {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    /// A part exhausted its retry budget.
    #[error("part {part_number} failed after {attempts} attempts")]
    UploadFailed {
        part_number: i32,
        attempts: u32,
        #[source]
        source: Arc<RemoteError>,
    },

    #[error("cannot {operation} a session that is {state:?}")]
    ProtocolViolation {
        operation: &'static str,
        state: SessionState,
    },

    /// Aborting the remote session failed while handling `cause`.
    #[error("{cause}; aborting the multipart upload also failed")]
    AbortFailed {
        cause: Box<Error>,
        #[source]
        source: RemoteError,
    },

    #[error("refusing to complete a multipart upload with no data")]
    EmptyUpload,

    #[error("invalid upload configuration: {0}")]
    InvalidConfig(String),

    #[error("all upload workers exited before part {part_number} could be queued")]
    WorkersGone { part_number: i32 },

    /// Finishing would leave a hole in the object.
    #[error("part {part_number} was never uploaded")]
    MissingPart { part_number: i32 },

    #[error("stream needs more than {limit} parts, use a larger part size")]
    TooManyParts { limit: usize },

    /// A `write` was dropped before all of its data was queued.
    #[error("a write was interrupted before its data was queued")]
    WriteInterrupted,

    #[error("upload worker stopped unexpectedly")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
