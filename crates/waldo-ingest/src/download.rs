//! Download stage
//!
//! Fetches every listed asset into the local root. An asset whose local
//! file already exists is produced by the skip check without a request.
//!
//! Local files are named by the key's base name, so `x/a.jpg` and
//! `y/a.jpg` share `a.jpg`. Whichever key lands first owns the file and
//! the other is served from it; a warning is logged when that happens
//! within one run. Keys with `.` or `..` segments are rejected, since the
//! URL they would be fetched from names a different object.

use futures::StreamExt;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waldo_common::WorkItem;

use crate::error::{DownloadCause, DownloadError, PipelineError};
use crate::runner::{BatchResult, BatchRunner};

pub const STAGE_NAME: &str = "download";

/// An asset present under the local root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    /// Listing key the asset was fetched for
    pub key: WorkItem,
    pub path: PathBuf,
}

impl fmt::Display for LocalAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[derive(Debug, Clone)]
pub struct DownloadStage {
    client: Client,
    base_url: Url,
    local_root: PathBuf,
}

impl DownloadStage {
    /// Create the stage, making sure `local_root` exists.
    pub async fn new(
        client: Client,
        base_url: Url,
        local_root: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let local_root = local_root.into();
        tokio::fs::create_dir_all(&local_root)
            .await
            .map_err(|source| PipelineError::LocalRoot {
                path: local_root.display().to_string(),
                source,
            })?;
        info!("Local asset root: {}", local_root.display());

        Ok(Self {
            client,
            base_url,
            local_root,
        })
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Where `key` is stored locally; `None` if the key has no file name
    /// or contains a `.` or `..` segment.
    pub fn local_path(&self, key: &WorkItem) -> Option<PathBuf> {
        if has_relative_segment(key) {
            return None;
        }
        key.base_name().map(|name| self.local_root.join(name))
    }

    /// Remote location of `key`, relative to the listing URL.
    pub fn asset_url(&self, key: &WorkItem) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.extend(key.as_str().split('/'));
        }
        url
    }

    /// The existing local asset for `key`, if there is one.
    pub fn skip(&self, key: &WorkItem) -> Option<LocalAsset> {
        let path = self.local_path(key)?;
        path.is_file().then(|| LocalAsset {
            key: key.clone(),
            path,
        })
    }

    /// Fetch one asset and store it under its local name.
    pub async fn download(&self, key: WorkItem) -> Result<LocalAsset, DownloadError> {
        let Some(path) = self.local_path(&key) else {
            return Err(DownloadError::new(key.as_str(), DownloadCause::InvalidKey));
        };
        let url = self.asset_url(&key);
        debug!(url = %url, "Downloading asset");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::new(key.as_str(), DownloadCause::Transport(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::new(key.as_str(), DownloadCause::Status(status)));
        }

        let partial = self.partial_path(&path);
        if let Err(cause) = write_body(response, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DownloadError::new(key.as_str(), cause));
        }
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DownloadError::new(key.as_str(), DownloadCause::Write(e)));
        }

        info!("Downloaded {}", path.display());
        Ok(LocalAsset { key, path })
    }

    /// Run the stage over `items`.
    pub async fn run(
        &self,
        runner: &BatchRunner,
        items: Vec<WorkItem>,
    ) -> BatchResult<LocalAsset, DownloadError> {
        // Local path -> key that claimed it in this run
        let owners: Mutex<HashMap<PathBuf, WorkItem>> = Mutex::new(HashMap::new());
        let owners = &owners;

        runner
            .run_with_skip(
                items,
                move |key| {
                    let asset = self.skip(key)?;
                    if let Ok(mut owners) = owners.lock() {
                        let owner = owners
                            .entry(asset.path.clone())
                            .or_insert_with(|| asset.key.clone());
                        warn_if_shared(Some(&*owner), &asset);
                    }
                    Some(asset)
                },
                move |key| async move {
                    let result = self.download(key).await;
                    if let (Ok(asset), Ok(mut owners)) = (&result, owners.lock()) {
                        let previous = owners.insert(asset.path.clone(), asset.key.clone());
                        warn_if_shared(previous.as_ref(), asset);
                    }
                    result
                },
            )
            .await
    }

    // Unique per attempt so duplicate keys in flight never share a file.
    fn partial_path(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.local_root
            .join(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
    }
}

fn has_relative_segment(key: &WorkItem) -> bool {
    key.as_str()
        .split('/')
        .any(|segment| segment == "." || segment == "..")
}

fn warn_if_shared(owner: Option<&WorkItem>, asset: &LocalAsset) {
    if let Some(owner) = owner.filter(|owner| **owner != asset.key) {
        warn!(
            key = %asset.key,
            owner = %owner,
            path = %asset.path.display(),
            "Local file already holds another key's asset"
        );
    }
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<(), DownloadCause> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(DownloadCause::Write)?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(DownloadCause::Transport)?;
        file.write_all(&chunk).await.map_err(DownloadCause::Write)?;
    }
    file.flush().await.map_err(DownloadCause::Write)?;
    Ok(())
}
