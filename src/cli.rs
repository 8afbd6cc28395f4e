//! Command line arguments.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::s3::{EmptyUploadPolicy, UploadConfig};

const MIB: usize = 1_048_576;

/// Stream data into cloud object storage with multipart uploads.
#[derive(Parser, Debug)]
#[command(name = "cloudsend")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// JSON config file [default: ~/.cloudsend.json]
    #[arg(long, global = true, env = "CLOUDSEND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or a full directive)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a stream to cloud storage
    Send(SendArgs),
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Where to read from: `stdin` (or `-`) or a file path
    #[arg(long, default_value = "stdin")]
    pub input: Source,

    /// Where to write: `s3:BUCKET/KEY` or `null` to discard
    #[arg(long)]
    pub output: Destination,

    /// Part size in MiB
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    pub part_size: u32,

    /// Number of concurrent part uploads
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub threads: u32,

    /// Attempts per part before the upload is aborted
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub retries: u32,

    /// Give up on a single part attempt after this many seconds
    #[arg(long)]
    pub attempt_timeout: Option<u64>,

    /// Fail instead of creating an empty object when the input is empty
    #[arg(long)]
    pub reject_empty: bool,

    /// Do not draw the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl SendArgs {
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            part_size: self.part_size as usize * MIB,
            workers: self.threads as usize,
            retry_limit: self.retries,
            attempt_timeout: self.attempt_timeout.map(Duration::from_secs),
            empty_upload: if self.reject_empty {
                EmptyUploadPolicy::Reject
            } else {
                EmptyUploadPolicy::SinglePart
            },
            ..UploadConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Stdin,
    File(PathBuf),
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("input must not be empty".into()),
            "stdin" | "-" => Ok(Source::Stdin),
            path => Ok(Source::File(path.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Null,
    S3 { bucket: String, key: String },
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "null" {
            return Ok(Destination::Null);
        }
        let invalid = || format!("invalid output '{s}', expected s3:BUCKET/KEY or null");

        let location = s.strip_prefix("s3:").ok_or_else(invalid)?;
        let (bucket, key) = location.split_once('/').ok_or_else(invalid)?;
        if bucket.is_empty() || key.is_empty() || key.ends_with('/') {
            return Err(invalid());
        }
        Ok(Destination::S3 {
            bucket: bucket.into(),
            key: key.into(),
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Null => f.write_str("null"),
            Destination::S3 { bucket, key } => write!(f, "s3:{bucket}/{key}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_destinations() {
        assert_eq!(
            "s3:backups/host/zfs.img".parse(),
            Ok(Destination::S3 {
                bucket: "backups".into(),
                key: "host/zfs.img".into(),
            })
        );
        assert_eq!("null".parse(), Ok(Destination::Null));
    }

    #[test]
    fn rejects_malformed_destinations() {
        let malformed = [
            "",
            "s3:",
            "s3:bucket",
            "s3:/key",
            "s3:bucket/",
            "s3:bucket/dir/",
            "gs:bucket/key",
        ];
        for bad in malformed {
            let err = bad.parse::<Destination>().unwrap_err();
            assert!(err.contains("invalid output"), "{bad}: {err}");
        }
    }

    #[test]
    fn parses_sources() {
        assert_eq!("stdin".parse(), Ok(Source::Stdin));
        assert_eq!("-".parse(), Ok(Source::Stdin));
        assert_eq!("/dev/zero".parse(), Ok(Source::File("/dev/zero".into())));
    }

    #[test]
    fn send_defaults_match_the_upload_engine() {
        let cli = Cli::try_parse_from(["cloudsend", "send", "--output", "s3:b/k"]).unwrap();
        let Command::Send(args) = cli.command;

        let config = args.upload_config();
        assert_eq!(config.part_size, 64 * MIB);
        assert_eq!(config.workers, 10);
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.empty_upload, EmptyUploadPolicy::SinglePart);
        assert_eq!(args.input, Source::Stdin);
    }

    #[test]
    fn send_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "cloudsend",
            "send",
            "--output",
            "null",
            "--part-size",
            "8",
            "--threads",
            "3",
            "--retries",
            "2",
            "--attempt-timeout",
            "30",
            "--reject-empty",
        ])
        .unwrap();
        let Command::Send(args) = cli.command;

        let config = args.upload_config();
        assert_eq!(config.part_size, 8 * MIB);
        assert_eq!(config.workers, 3);
        assert_eq!(config.retry_limit, 2);
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.empty_upload, EmptyUploadPolicy::Reject);
    }

    #[test]
    fn zero_threads_are_refused() {
        let result =
            Cli::try_parse_from(["cloudsend", "send", "--output", "null", "--threads", "0"]);
        assert!(result.is_err());
    }
}
