//! Streaming multipart uploads to S3-compatible object storage.
//!
//! An [`UploadSession`] accepts an arbitrarily long byte stream, cuts it into
//! fixed-size parts and uploads them through a bounded pool of workers.

mod client;
mod config;
mod error;
mod multipart;
mod partition;
mod remote;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use client::S3Remote;
pub use config::{EmptyUploadPolicy, UploadConfig, DEFAULT_PART_SIZE};
pub use error::{Error, RemoteError, Result};
pub use multipart::{SessionState, UploadSession};
pub use partition::Part;
pub use remote::{MultipartId, PartReceipt, RemoteStorage};
