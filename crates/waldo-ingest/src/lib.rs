//! Waldo Ingest Library
//!
//! Fetches an S3-style object listing, downloads every listed image,
//! extracts its EXIF metadata and upserts one record per image into a
//! record store.
//!
//! # Stages
//!
//! - **Download**: fetch each asset into the local root, skipping assets
//!   already on disk
//! - **Metadata**: extract EXIF attributes, keyed by the asset's file name
//! - **Persist**: upsert each record by its key
//!
//! Every stage runs on a [`BatchRunner`](runner::BatchRunner): items are
//! attempted in order, one at a time by default, and a failing item is
//! recorded without stopping the batch.
//!
//! # Example
//!
//! ```no_run
//! use waldo_ingest::config::parse_listing_url;
//! use waldo_ingest::{Pipeline, PipelineConfig, StoreTarget};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let url = parse_listing_url("http://s3.amazonaws.com/waldo-recruiting")?;
//!     let config = PipelineConfig::new(url, StoreTarget::Memory).with_local_root("./data/images");
//!     let summary = Pipeline::new(config)?.run().await?;
//!     summary.log();
//!     Ok(())
//! }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod listing;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod sink;
pub mod store;
pub mod summary;

pub use config::PipelineConfig;
pub use download::{DownloadStage, LocalAsset};
pub use error::{
    ConfigError, DownloadError, ExtractionError, ListingFetchError, ListingParseError,
    PersistenceError, PipelineError, RunnerUsageError, StoreError,
};
pub use metadata::{ExifExtractor, MetadataExtractor, MetadataStage};
pub use pipeline::Pipeline;
pub use runner::{BatchResult, BatchRunner, RunnerConfig};
pub use sink::PersistenceSink;
pub use store::{MemoryRecordStore, PgRecordStore, RecordStore, StoreTarget};
pub use summary::RunSummary;
