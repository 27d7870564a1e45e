//! Command-line interface

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    parse_listing_url, PipelineConfig, DEFAULT_LISTING_URL, DEFAULT_LOCAL_ROOT,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_STORE_CONNECT_TIMEOUT_SECS, DEFAULT_STORE_URL,
};
use crate::error::ConfigError;
use crate::runner::{RunnerConfig, DEFAULT_CONCURRENCY};
use crate::store::StoreTarget;

#[derive(Parser, Debug)]
#[command(name = "waldo-ingest")]
#[command(author, version, about = "Download listed images, extract EXIF metadata and store it")]
pub struct Cli {
    /// Object listing endpoint; assets are fetched relative to it
    #[arg(long, env = "WALDO_LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    pub listing_url: String,

    /// Directory downloaded assets are cached in
    #[arg(long, env = "WALDO_LOCAL_ROOT", default_value = DEFAULT_LOCAL_ROOT)]
    pub local_root: PathBuf,

    /// Items in flight per stage
    #[arg(long, env = "WALDO_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Give up on a single item after this many seconds
    #[arg(long, env = "WALDO_ITEM_TIMEOUT_SECS")]
    pub item_timeout_secs: Option<u64>,

    /// Record store: postgres://..., postgresql://... or memory://
    /// (falls back to DATABASE_URL, then postgresql://localhost:5432/waldo)
    #[arg(long = "store", env = "WALDO_STORE_URL")]
    pub store_url: Option<String>,

    /// Give up opening the record store after this many seconds
    #[arg(
        long,
        env = "WALDO_STORE_CONNECT_TIMEOUT_SECS",
        default_value_t = DEFAULT_STORE_CONNECT_TIMEOUT_SECS
    )]
    pub store_connect_timeout_secs: u64,

    /// HTTP client timeout in seconds
    #[arg(long, env = "WALDO_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Key to read back after persistence (defaults to the first persisted key)
    #[arg(long, env = "WALDO_VERIFY_KEY")]
    pub verify_key: Option<String>,

    /// Write the run summary as JSON to this file
    #[arg(long, env = "WALDO_SUMMARY_JSON")]
    pub summary_json: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Store URL from the flag, `WALDO_STORE_URL`, `DATABASE_URL`, or the default.
    pub fn store_url(&self) -> String {
        self.store_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_STORE_URL.to_string())
    }

    /// Build and validate the pipeline configuration.
    pub fn to_config(&self) -> Result<PipelineConfig, ConfigError> {
        let listing_url = parse_listing_url(&self.listing_url)?;
        let store: StoreTarget = self.store_url().parse()?;
        let runner = RunnerConfig::default()
            .with_concurrency(self.concurrency)
            .with_item_timeout(self.item_timeout_secs.map(Duration::from_secs));

        let config = PipelineConfig::new(listing_url, store)
            .with_local_root(&self.local_root)
            .with_runner(runner)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_store_connect_timeout(Duration::from_secs(self.store_connect_timeout_secs))
            .with_verify_key(self.verify_key.clone())
            .with_summary_json(self.summary_json.clone());
        config.validate()?;
        Ok(config)
    }
}
