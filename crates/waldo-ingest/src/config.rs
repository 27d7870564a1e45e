//! Pipeline configuration

use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::runner::RunnerConfig;
use crate::store::StoreTarget;

// ============================================================================
// Defaults
// ============================================================================

/// Default listing endpoint. Assets are fetched relative to it.
pub const DEFAULT_LISTING_URL: &str = "http://s3.amazonaws.com/waldo-recruiting";

/// Default directory downloaded assets are cached in.
pub const DEFAULT_LOCAL_ROOT: &str = "./data/images";

/// Default record store.
pub const DEFAULT_STORE_URL: &str = "postgresql://localhost:5432/waldo";

/// Default HTTP client timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default wait for a record store connection in seconds.
pub const DEFAULT_STORE_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Everything one pipeline run needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub listing_url: Url,
    pub local_root: PathBuf,
    pub runner: RunnerConfig,
    pub store: StoreTarget,
    pub request_timeout: Duration,
    pub store_connect_timeout: Duration,
    /// Key read back after persistence; the first persisted key otherwise
    pub verify_key: Option<String>,
    pub summary_json: Option<PathBuf>,
}

impl PipelineConfig {
    /// Configuration with default local root, runner and timeouts.
    pub fn new(listing_url: Url, store: StoreTarget) -> Self {
        Self {
            listing_url,
            local_root: PathBuf::from(DEFAULT_LOCAL_ROOT),
            runner: RunnerConfig::default(),
            store,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            store_connect_timeout: Duration::from_secs(DEFAULT_STORE_CONNECT_TIMEOUT_SECS),
            verify_key: None,
            summary_json: None,
        }
    }

    pub fn with_local_root(mut self, local_root: impl Into<PathBuf>) -> Self {
        self.local_root = local_root.into();
        self
    }

    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_store_connect_timeout(mut self, timeout: Duration) -> Self {
        self.store_connect_timeout = timeout;
        self
    }

    pub fn with_verify_key(mut self, key: Option<String>) -> Self {
        self.verify_key = key;
        self
    }

    pub fn with_summary_json(mut self, path: Option<PathBuf>) -> Self {
        self.summary_json = path;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_listing_url(&self.listing_url)?;

        if self.local_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyLocalRoot);
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroRequestTimeout);
        }

        if self.store_connect_timeout.is_zero() {
            return Err(ConfigError::ZeroStoreConnectTimeout);
        }

        self.runner.validate()?;
        Ok(())
    }
}

/// Parse and check a listing URL.
pub fn parse_listing_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidListingUrl {
            url: raw.to_string(),
            reason: "URL is empty".to_string(),
        });
    }

    let url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidListingUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    check_listing_url(&url)?;
    Ok(url)
}

fn check_listing_url(url: &Url) -> Result<(), ConfigError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidListingUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    // Assets are addressed by appending path segments.
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidListingUrl {
            url: url.to_string(),
            reason: "URL cannot carry a path".to_string(),
        });
    }
    Ok(())
}
