//! Waldo Common Library
//!
//! Shared types and logging for the Waldo workspace.
//!
//! - **Types**: work item identifiers and extracted metadata records
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```
//! use waldo_common::types::{base_name, WorkItem};
//!
//! let item = WorkItem::new("photos/2017/a.jpg").unwrap();
//! assert_eq!(base_name(item.as_str()), Some("a.jpg"));
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
pub use types::{base_name, Attributes, MetadataRecord, WorkItem, SOURCE_KEY_FIELD};
