//! Streams arbitrarily long input into cloud object storage using multipart uploads.

pub mod cli;
pub mod commands;
pub mod config;
pub mod progress;
pub mod s3;
