//! Error types for the ingest pipeline
//!
//! Errors fall in two groups:
//!
//! - **Fatal** ([`PipelineError`]): the listing could not be fetched or
//!   parsed, the configuration is invalid, or the store could not be
//!   opened. The run aborts and the binary exits non-zero.
//! - **Per item** ([`DownloadError`], [`ExtractionError`],
//!   [`PersistenceError`]): recorded against the item in the stage's
//!   `BatchResult` and reported in the run summary. They never abort a
//!   stage.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use waldo_common::CommonError;

/// Fatal errors that abort a run before, between or around stages
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    ListingFetch(#[from] ListingFetchError),

    #[error(transparent)]
    ListingParse(#[from] ListingParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RunnerUsage(#[from] RunnerUsageError),

    #[error("Failed to prepare local asset root {path}: {source}")]
    LocalRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open record store: {0}")]
    StoreConnect(#[source] StoreError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// The listing endpoint could not be read
#[derive(Error, Debug)]
pub enum ListingFetchError {
    #[error("Listing request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Listing request to {url} failed with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("Invalid content type from {url}: expected an XML document but received '{content_type}'")]
    ContentType { url: String, content_type: String },

    #[error("Failed to read listing body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// The listing document does not have the expected shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListingParseError {
    #[error("Malformed listing document: {0}")]
    Malformed(String),

    #[error("Expected to find {0} in the listing but it was not there")]
    MissingContainer(&'static str),

    #[error("Listing entry #{index} has no Key")]
    MissingKey { index: usize },
}

/// A single asset could not be downloaded
#[derive(Error, Debug)]
#[error("Failed to download '{item}': {cause}")]
pub struct DownloadError {
    pub item: String,
    #[source]
    pub cause: DownloadCause,
}

impl DownloadError {
    pub fn new(item: impl Into<String>, cause: DownloadCause) -> Self {
        Self {
            item: item.into(),
            cause,
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadCause {
    #[error("key has no file name to store it under")]
    InvalidKey,

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(StatusCode),

    #[error("could not write asset: {0}")]
    Write(#[source] std::io::Error),
}

/// Metadata could not be extracted from a local asset
#[derive(Error, Debug)]
#[error("Failed to extract metadata from '{local_identifier}': {cause}")]
pub struct ExtractionError {
    pub local_identifier: String,
    #[source]
    pub cause: ExtractionCause,
}

impl ExtractionError {
    pub fn new(local_identifier: impl Into<String>, cause: ExtractionCause) -> Self {
        Self {
            local_identifier: local_identifier.into(),
            cause,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractionCause {
    #[error("asset is unreadable: {0}")]
    Io(#[source] std::io::Error),

    #[error("no usable EXIF data: {0}")]
    Exif(#[source] exif::Error),

    #[error(transparent)]
    Key(#[from] CommonError),

    #[error("extraction worker failed: {0}")]
    Worker(String),
}

/// A record could not be written to (or read from) the store
#[derive(Error, Debug)]
#[error("Failed to persist record '{source_key}': {cause}")]
pub struct PersistenceError {
    pub source_key: String,
    #[source]
    pub cause: StoreError,
}

impl PersistenceError {
    pub fn new(source_key: impl Into<String>, cause: StoreError) -> Self {
        Self {
            source_key: source_key.into(),
            cause,
        }
    }
}

/// Errors raised by a record store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("no connection within {0:?}; is the database reachable?")]
    ConnectTimeout(Duration),

    #[error("store is closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),
}

/// The batch runner was configured with values it cannot honour
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerUsageError {
    #[error("Runner concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Per-item timeout must be greater than zero (got {0:?})")]
    ZeroTimeout(Duration),
}

/// Invalid pipeline configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid listing URL '{url}': {reason}")]
    InvalidListingUrl { url: String, reason: String },

    #[error("Invalid store target '{0}': expected postgres://, postgresql:// or memory://")]
    InvalidStore(String),

    #[error("Local root must not be empty")]
    EmptyLocalRoot,

    #[error("Request timeout must be greater than zero")]
    ZeroRequestTimeout,

    #[error("Store connect timeout must be greater than zero")]
    ZeroStoreConnectTimeout,

    #[error(transparent)]
    Runner(#[from] RunnerUsageError),
}
