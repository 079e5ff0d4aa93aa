//! Configuration module
//!
//! Gateway settings loaded from the environment (and an optional `.env`
//! file). Lookup goes through [`Config::from_lookup`] so tests can supply
//! values without touching process state.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const SERVER_HOST: &str = "0.0.0.0";
const SERVER_PORT: u16 = 8181;
const UPSTREAM_URL: &str = "http://127.0.0.1:8080";
const S3_REGION: &str = "us-east-1";
const ZIP_METADATA_COMMAND: &str = "sluice-zip-metadata";
const ZIP_METADATA_TIMEOUT_SECS: u64 = 300;
const REQUEST_TIMEOUT_SECS: u64 = 600;
const MAX_FILES_PER_REQUEST: usize = 10;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub server_host: String,
    pub server_port: u16,
    pub upstream_url: String,
    pub environment: String,
    pub signing_secret: String,
    pub request_timeout_secs: u64,
    pub max_files_per_request: usize,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub local_temp_path: PathBuf,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    // Format analysis subprocess
    pub zip_metadata_command: String,
    /// 0 = bounded only by the request deadline.
    pub zip_metadata_timeout_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<GatewayConfig>);

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build and validate a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = GatewayConfig::from_lookup(&lookup)?;
        let config = Config(Box::new(config));
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.0.validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.0.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.0.server_host, self.0.server_port)
    }

    pub fn upstream_url(&self) -> &str {
        &self.0.upstream_url
    }

    pub fn signing_secret(&self) -> &str {
        &self.0.signing_secret
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.0.request_timeout_secs)
    }

    pub fn max_files_per_request(&self) -> usize {
        self.0.max_files_per_request
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.0.storage_backend
    }

    pub fn local_temp_path(&self) -> &PathBuf {
        &self.0.local_temp_path
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.0.s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> &str {
        &self.0.s3_region
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.0.s3_endpoint.as_deref()
    }

    pub fn zip_metadata_command(&self) -> &str {
        &self.0.zip_metadata_command
    }

    pub fn zip_metadata_timeout(&self) -> Option<Duration> {
        match self.0.zip_metadata_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl GatewayConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let storage_backend = lookup("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .parse::<StorageBackend>()?;

        let local_temp_path = lookup("LOCAL_TEMP_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        Ok(GatewayConfig {
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| SERVER_HOST.to_string()),
            server_port: lookup("SERVER_PORT")
                .or_else(|| lookup("PORT"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(SERVER_PORT),
            upstream_url: lookup("UPSTREAM_URL")
                .unwrap_or_else(|| UPSTREAM_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            environment,
            signing_secret: lookup("SIGNING_SECRET").unwrap_or_default(),
            request_timeout_secs: lookup("REQUEST_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(REQUEST_TIMEOUT_SECS),
            max_files_per_request: lookup("MAX_FILES_PER_REQUEST")
                .and_then(|v| v.parse().ok())
                .unwrap_or(MAX_FILES_PER_REQUEST),
            storage_backend,
            local_temp_path,
            s3_bucket: lookup("S3_BUCKET").filter(|b| !b.is_empty()),
            s3_region: lookup("S3_REGION").unwrap_or_else(|| S3_REGION.to_string()),
            s3_endpoint: lookup("S3_ENDPOINT").filter(|e| !e.is_empty()),
            zip_metadata_command: lookup("ZIP_METADATA_COMMAND")
                .unwrap_or_else(|| ZIP_METADATA_COMMAND.to_string()),
            zip_metadata_timeout_secs: lookup("ZIP_METADATA_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(ZIP_METADATA_TIMEOUT_SECS),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.signing_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "SIGNING_SECRET must be at least 32 characters long"
            ));
        }

        if self.storage_backend == StorageBackend::S3 && self.s3_bucket.is_none() {
            return Err(anyhow::anyhow!(
                "STORAGE_BACKEND=s3 requires S3_BUCKET to be set"
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("REQUEST_TIMEOUT_SECS must be greater than 0"));
        }

        if self.max_files_per_request == 0 {
            return Err(anyhow::anyhow!(
                "MAX_FILES_PER_REQUEST must be greater than 0"
            ));
        }

        if self.zip_metadata_command.trim().is_empty() {
            return Err(anyhow::anyhow!("ZIP_METADATA_COMMAND must not be empty"));
        }

        Ok(())
    }
}
