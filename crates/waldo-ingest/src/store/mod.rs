//! Record stores
//!
//! A [`RecordStore`] persists [`MetadataRecord`]s keyed by their
//! `sourceKey`. Writes are upserts: storing the same key twice leaves one
//! record holding the second write's attributes.

use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use waldo_common::MetadataRecord;

use crate::error::{ConfigError, StoreError};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

/// Storage backend for extracted metadata
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert `record`, or replace the stored record with the same key.
    async fn upsert(&self, record: &MetadataRecord) -> Result<(), StoreError>;

    /// Read one record back by its key.
    async fn find_by_key(&self, source_key: &str) -> Result<Option<MetadataRecord>, StoreError>;

    /// Release the backend's connection. Later calls fail with
    /// [`StoreError::Closed`].
    async fn close(&self);
}

/// Which backend a run persists into
#[derive(Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Postgres(String),
    Memory,
}

impl FromStr for StoreTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "memory://" || s == "memory" {
            return Ok(Self::Memory);
        }
        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            return Ok(Self::Postgres(s.to_string()));
        }
        Err(ConfigError::InvalidStore(s.to_string()))
    }
}

// Connection strings may carry a password; never print it.
impl fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory://"),
            Self::Postgres(url) => match Url::parse(url) {
                Ok(mut parsed) => {
                    if parsed.password().is_some() {
                        let _ = parsed.set_password(Some("****"));
                    }
                    write!(f, "{parsed}")
                },
                Err(_) => f.write_str("postgres://<unparseable>"),
            },
        }
    }
}

impl fmt::Debug for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreTarget({self})")
    }
}

/// Open the backend named by `target`, waiting at most `connect_timeout`
/// for a database connection.
pub async fn open_store(
    target: &StoreTarget,
    connect_timeout: Duration,
) -> Result<Box<dyn RecordStore>, StoreError> {
    match target {
        StoreTarget::Memory => Ok(Box::new(MemoryRecordStore::new())),
        StoreTarget::Postgres(url) => {
            Ok(Box::new(PgRecordStore::connect(url, connect_timeout).await?))
        },
    }
}
