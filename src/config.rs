//! Settings file and AWS client construction.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3 as s3;
use aws_types::region::Region;
use serde::Deserialize;
use tracing::debug;

const CONFIG_FILE: &str = ".cloudsend.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub s3: S3Settings,
}

/// Connection settings for the S3 endpoint. Anything left out falls back to
/// the AWS SDK defaults (environment, profile, instance metadata).
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct S3Settings {
    /// Custom endpoint for S3-compatible services, e.g. `http://localhost:9000`.
    #[serde(alias = "host")]
    pub endpoint: Option<String>,
    pub region: Option<String>,
    #[serde(alias = "token")]
    pub access_key: Option<String>,
    #[serde(alias = "secret")]
    pub secret_key: Option<String>,
    pub force_path_style: bool,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        env::var_os("HOME").map(|home| PathBuf::from(home).join(CONFIG_FILE))
    }

    /// Reads `path`, or the default file when it exists. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        debug!(path = %path.display(), "loading config");
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

impl S3Settings {
    pub async fn client(&self) -> s3::Client {
        let region = self
            .region
            .clone()
            .or_else(|| env::var("AWSREGION").ok())
            .map(Region::new);
        let region_provider = RegionProviderChain::first_try(region)
            .or_default_provider()
            .or_else(Region::new("us-east-1"));
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut builder =
            s3::config::Builder::from(&config).force_path_style(self.force_path_style);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&self.access_key, &self.secret_key) {
            builder = builder.credentials_provider(s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "cloudsend-config",
            ));
        }
        s3::Client::from_conf(builder.build())
    }
}
