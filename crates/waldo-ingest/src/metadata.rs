//! Metadata stage
//!
//! Extracts EXIF attributes from each downloaded asset and keys the
//! resulting [`MetadataRecord`] by the asset's base file name. Metadata is
//! never cached: every asset handed to the stage is extracted again.

use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use waldo_common::{Attributes, MetadataRecord};

use crate::download::LocalAsset;
use crate::error::{ExtractionCause, ExtractionError};
use crate::runner::{BatchResult, BatchRunner};

pub const STAGE_NAME: &str = "metadata";

/// Reads embedded attributes from a local file.
///
/// Implementations are called on a blocking worker thread. They must not
/// set the record key; the stage derives it from the file name.
pub trait MetadataExtractor: Send + Sync + 'static {
    fn extract(&self, path: &Path) -> Result<Attributes, ExtractionCause>;
}

/// EXIF extractor backed by `kamadak-exif`
///
/// Fields are grouped into `image`, `thumbnail`, `exif`, `gps` and
/// `interoperability` sections, each value rendered with its unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifExtractor;

impl ExifExtractor {
    #[allow(unreachable_patterns)]
    fn section(field: &exif::Field) -> &'static str {
        if field.ifd_num == exif::In::THUMBNAIL {
            return "thumbnail";
        }
        match field.tag.context() {
            exif::Context::Tiff => "image",
            exif::Context::Exif => "exif",
            exif::Context::Gps => "gps",
            exif::Context::Interop => "interoperability",
            _ => "image",
        }
    }
}

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, path: &Path) -> Result<Attributes, ExtractionCause> {
        let file = File::open(path).map_err(ExtractionCause::Io)?;
        let mut reader = BufReader::new(file);
        let exif = exif::Reader::new()
            .read_from_container(&mut reader)
            .map_err(ExtractionCause::Exif)?;

        let mut attributes = Attributes::new();
        for field in exif.fields() {
            let value = field.display_value().with_unit(&exif).to_string();
            let section = attributes
                .entry(Self::section(field).to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(entries) = section {
                entries.insert(field.tag.to_string(), Value::String(value));
            }
        }
        Ok(attributes)
    }
}

pub struct MetadataStage {
    extractor: Arc<dyn MetadataExtractor>,
}

impl MetadataStage {
    pub fn new(extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self { extractor }
    }

    /// Extract one asset's attributes and key them by its file name.
    pub async fn extract(&self, asset: LocalAsset) -> Result<MetadataRecord, ExtractionError> {
        let local_identifier = asset.path.to_string_lossy().into_owned();
        let extractor = Arc::clone(&self.extractor);
        let path = asset.path;

        let attributes = tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|e| {
                ExtractionError::new(&local_identifier, ExtractionCause::Worker(e.to_string()))
            })?
            .map_err(|cause| ExtractionError::new(&local_identifier, cause))?;

        let record = MetadataRecord::tagged(&local_identifier, attributes)
            .map_err(|e| ExtractionError::new(&local_identifier, e.into()))?;
        debug!(
            source_key = record.source_key(),
            sections = record.attributes().len(),
            "Extracted metadata"
        );
        Ok(record)
    }

    /// Run the stage over every downloaded asset.
    pub async fn run(
        &self,
        runner: &BatchRunner,
        assets: Vec<LocalAsset>,
    ) -> BatchResult<MetadataRecord, ExtractionError> {
        runner.run(assets, move |asset| self.extract(asset)).await
    }
}

impl std::fmt::Debug for MetadataStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStage").finish_non_exhaustive()
    }
}
