//! Configuration module
//!
//! [`HandlerConfig`] is the JSON document a bucket handler is initialized with.
//! [`Config`] holds the process-level settings read from the environment by the
//! CLI and any embedding server.

use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::HandlerKind;

// Common constants
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_SERVE_URL: &str = "/v0/file/s/";
const DEFAULT_LOCAL_ROOT: &str = "./data/objects";
const GC_PERIOD_SECS: u64 = 3600;
const GC_BLOCK_SIZE: usize = 100;
const GC_GRACE_SECS: u64 = 86400;

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_serve_url() -> String {
    DEFAULT_SERVE_URL.to_string()
}

/// Bucket handler configuration
///
/// Required fields are defaulted to empty strings during parsing so that
/// [`HandlerConfig::validate`] can name the missing field.
#[derive(Clone, Deserialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    /// `host[:port]` of the object store, without scheme.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, alias = "useSSL")]
    pub use_tls: bool,
    /// Public URL prefix used to build and parse download links.
    #[serde(default = "default_serve_url")]
    pub serve_url: String,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("use_tls", &self.use_tls)
            .field("serve_url", &self.serve_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl HandlerConfig {
    /// Parse and validate a JSON handler configuration.
    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        let config: HandlerConfig = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("Failed to parse handler config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.access_key_id.trim().is_empty() {
            return Err(anyhow::anyhow!("access_key_id must be set"));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(anyhow::anyhow!("secret_access_key must be set"));
        }
        validate_endpoint(&self.endpoint)?;
        validate_bucket_name(&self.bucket)?;
        if self.region.trim().is_empty() {
            return Err(anyhow::anyhow!("region must not be empty"));
        }
        if self.serve_url.trim().is_empty() {
            return Err(anyhow::anyhow!("serve_url must not be empty"));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(anyhow::anyhow!(
                "request_timeout_secs must be greater than zero"
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// `host[:port]`, no scheme, no path.
fn validate_endpoint(endpoint: &str) -> Result<(), anyhow::Error> {
    if endpoint.is_empty() {
        return Err(anyhow::anyhow!("endpoint must be set"));
    }
    if endpoint.contains("://") || endpoint.contains('/') {
        return Err(anyhow::anyhow!(
            "endpoint must be host[:port] without scheme or path, got '{}'",
            endpoint
        ));
    }
    if endpoint.starts_with('[') && endpoint.ends_with(']') {
        return Ok(());
    }

    if let Some((host, port)) = endpoint.rsplit_once(':') {
        if host.is_empty() {
            return Err(anyhow::anyhow!("endpoint host must not be empty"));
        }
        port.parse::<u16>()
            .map_err(|_| anyhow::anyhow!("endpoint port '{}' is not a valid port", port))?;
    }
    Ok(())
}

/// S3 bucket naming: 3-63 chars of `[a-z0-9.-]`, alphanumeric at both ends.
fn validate_bucket_name(bucket: &str) -> Result<(), anyhow::Error> {
    if bucket.is_empty() {
        return Err(anyhow::anyhow!("bucket must be set"));
    }
    if !(3..=63).contains(&bucket.len()) {
        return Err(anyhow::anyhow!(
            "bucket name '{}' must be between 3 and 63 characters",
            bucket
        ));
    }
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let alnum_ends = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);
    if !valid_chars || !alnum_ends {
        return Err(anyhow::anyhow!("bucket name '{}' is not valid", bucket));
    }
    Ok(())
}

/// Process-level configuration.
#[derive(Clone)]
pub struct Config {
    pub media_handler: String,
    /// Raw JSON handed to the handler at init. Contains the secret key.
    pub media_config: String,
    pub local_root: PathBuf,
    pub database_url: Option<String>,
    pub gc_period_secs: u64,
    pub gc_block_size: usize,
    pub gc_grace_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("media_handler", &self.media_handler)
            .field("media_config", &"<redacted>")
            .field("local_root", &self.local_root)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("gc_period_secs", &self.gc_period_secs)
            .field("gc_block_size", &self.gc_block_size)
            .field("gc_grace_secs", &self.gc_grace_secs)
            .finish()
    }
}

impl Config {
    /// Read the process environment. Callers load `.env` first if they want it.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = Config {
            media_handler: env::var("STOWAGE_MEDIA_HANDLER")
                .unwrap_or_else(|_| HandlerKind::Minio.to_string()),
            media_config: env::var("STOWAGE_MEDIA_CONFIG")
                .map_err(|_| anyhow::anyhow!("STOWAGE_MEDIA_CONFIG must be set"))?,
            local_root: env::var("STOWAGE_LOCAL_ROOT")
                .unwrap_or_else(|_| DEFAULT_LOCAL_ROOT.to_string())
                .into(),
            database_url: env::var("DATABASE_URL").ok(),
            gc_period_secs: env::var("STOWAGE_GC_PERIOD_SECS")
                .unwrap_or_else(|_| GC_PERIOD_SECS.to_string())
                .parse()
                .unwrap_or(GC_PERIOD_SECS),
            gc_block_size: env::var("STOWAGE_GC_BLOCK_SIZE")
                .unwrap_or_else(|_| GC_BLOCK_SIZE.to_string())
                .parse()
                .unwrap_or(GC_BLOCK_SIZE),
            gc_grace_secs: env::var("STOWAGE_GC_GRACE_SECS")
                .unwrap_or_else(|_| GC_GRACE_SECS.to_string())
                .parse()
                .unwrap_or(GC_GRACE_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.handler_kind()?;
        HandlerConfig::from_json(&self.media_config)?;

        if let Some(ref url) = self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }
        if self.gc_block_size == 0 {
            return Err(anyhow::anyhow!("STOWAGE_GC_BLOCK_SIZE must be at least 1"));
        }
        if self.gc_period_secs == 0 {
            return Err(anyhow::anyhow!("STOWAGE_GC_PERIOD_SECS must be at least 1"));
        }
        Ok(())
    }

    pub fn handler_kind(&self) -> Result<HandlerKind, anyhow::Error> {
        self.media_handler.parse()
    }

    pub fn gc_period(&self) -> Duration {
        Duration::from_secs(self.gc_period_secs)
    }

    pub fn gc_grace(&self) -> Duration {
        Duration::from_secs(self.gc_grace_secs)
    }
}
