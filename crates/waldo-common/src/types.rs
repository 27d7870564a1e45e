//! Shared domain types
//!
//! A [`WorkItem`] names one unit of work: an object key from the remote
//! listing, or later the local identifier of a downloaded asset. A
//! [`MetadataRecord`] is what the metadata stage hands to persistence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CommonError, Result};

/// Name of the attribute carrying the record key in serialized records.
pub const SOURCE_KEY_FIELD: &str = "sourceKey";

/// Attribute map produced by a metadata extractor.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Opaque, immutable identifier for one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CommonError::EmptyWorkItem);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the identifier, if it has a usable one.
    pub fn base_name(&self) -> Option<&str> {
        base_name(&self.0)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkItem {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns the last `/` (or `\`) separated segment of `id`.
///
/// Empty segments and the relative markers `.` and `..` yield `None`, so a
/// key such as `photos/` (a directory placeholder in object listings) never
/// maps onto a file name.
///
/// ```
/// use waldo_common::base_name;
///
/// assert_eq!(base_name("/srv/images/a.jpg"), Some("a.jpg"));
/// assert_eq!(base_name("a.jpg"), Some("a.jpg"));
/// assert_eq!(base_name("photos/"), None);
/// ```
pub fn base_name(id: &str) -> Option<&str> {
    id.rsplit(['/', '\\'])
        .next()
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
}

/// Extracted metadata for one asset, keyed by the asset's base file name.
///
/// The key is assigned when the record is created from extracted
/// attributes; extractors only ever produce the [`Attributes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "sourceKey")]
    source_key: String,

    #[serde(flatten)]
    attributes: Attributes,
}

impl MetadataRecord {
    /// Tag `attributes` with the base name of `local_identifier`.
    ///
    /// Any `sourceKey` attribute reported by the extractor is dropped in
    /// favour of the derived key.
    pub fn tagged(local_identifier: &str, mut attributes: Attributes) -> Result<Self> {
        let source_key = base_name(local_identifier)
            .ok_or_else(|| CommonError::NoBaseName(local_identifier.to_string()))?
            .to_string();
        attributes.remove(SOURCE_KEY_FIELD);

        Ok(Self {
            source_key,
            attributes,
        })
    }

    /// Rebuild a record from stored parts.
    pub fn from_parts(source_key: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            source_key: source_key.into(),
            attributes,
        }
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn into_parts(self) -> (String, Attributes) {
        (self.source_key, self.attributes)
    }
}

impl fmt::Display for MetadataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source_key)
    }
}
