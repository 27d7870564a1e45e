//! Pipeline orchestration
//!
//! Listing fetch → parse → download stage → metadata stage → persistence.
//! Each stage starts only after the previous one has attempted its whole
//! batch. Fatal errors abort the run; per-item errors land in the
//! [`RunSummary`].

use reqwest::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::PipelineConfig;
use crate::download::{self, DownloadStage};
use crate::error::PipelineError;
use crate::listing::{parse_listing, ListingClient};
use crate::metadata::{self, ExifExtractor, MetadataExtractor, MetadataStage};
use crate::runner::{BatchRunner, ProgressObserver, RunnerConfig};
use crate::sink::{self, PersistenceSink};
use crate::store::{open_store, RecordStore};
use crate::summary::RunSummary;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct Pipeline {
    config: PipelineConfig,
    client: Client,
    extractor: Arc<dyn MetadataExtractor>,
    store: Option<Arc<dyn RecordStore>>,
    cancel: CancellationToken,
    progress: Option<ProgressObserver>,
}

impl Pipeline {
    /// Validate `config` and build the HTTP client.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(PipelineError::HttpClient)?;

        Ok(Self {
            config,
            client,
            extractor: Arc::new(ExifExtractor),
            store: None,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Persist into `store` instead of opening the configured target.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline once.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::start();
        let span = info_span!("pipeline", run_id = %summary.run_id);
        self.execute(&mut summary).instrument(span).await?;
        Ok(summary.finish())
    }

    async fn execute(&self, summary: &mut RunSummary) -> Result<(), PipelineError> {
        let listing_url = &self.config.listing_url;
        let body = ListingClient::new(self.client.clone())
            .fetch(listing_url)
            .await?;
        let listing = parse_listing(&body)?;
        if listing.truncated {
            warn!("Listing is truncated; only the first page will be processed");
        }
        summary.listed = listing.items.len();
        info!(items = summary.listed, "Listing parsed");

        // Download
        let stage = DownloadStage::new(
            self.client.clone(),
            listing_url.clone(),
            &self.config.local_root,
        )
        .await?;
        let runner = self.runner(download::STAGE_NAME, self.config.runner)?;
        let downloads = stage.run(&runner, listing.items).await;
        summary.record(&downloads);
        if self.stopped(summary) {
            return Ok(());
        }

        // Metadata
        let stage = MetadataStage::new(Arc::clone(&self.extractor));
        let runner = self.runner(metadata::STAGE_NAME, self.config.runner)?;
        let extracted = stage.run(&runner, downloads.into_outputs()).await;
        summary.record(&extracted);
        if self.stopped(summary) {
            return Ok(());
        }

        // Persistence, one write at a time
        let runner = self.runner(
            sink::STAGE_NAME,
            RunnerConfig::default().with_item_timeout(self.config.runner.item_timeout),
        )?;
        let store = match &self.store {
            Some(store) => Arc::clone(store),
            None => {
                info!(store = %self.config.store, "Opening record store");
                Arc::from(
                    open_store(&self.config.store, self.config.store_connect_timeout)
                        .await
                        .map_err(PipelineError::StoreConnect)?,
                )
            },
        };

        self.persist(store.as_ref(), &runner, extracted.into_outputs(), summary)
            .await;
        store.close().await;
        Ok(())
    }

    async fn persist(
        &self,
        store: &dyn RecordStore,
        runner: &BatchRunner,
        records: Vec<waldo_common::MetadataRecord>,
        summary: &mut RunSummary,
    ) {
        let sink = PersistenceSink::new(store);
        let persisted = sink.upsert_all(runner, records).await;
        summary.record(&persisted);

        let key = self
            .config
            .verify_key
            .clone()
            .or_else(|| persisted.outputs.first().cloned());
        let Some(key) = key else {
            return;
        };
        match sink.verify(&key).await {
            Ok(Some(_)) => summary.verified = Some(key),
            Ok(None) => {},
            Err(e) => warn!(error = %e, "Verification read failed"),
        }
    }

    fn runner(&self, stage: &str, config: RunnerConfig) -> Result<BatchRunner, PipelineError> {
        let mut runner = BatchRunner::new(stage, config)?.with_cancellation(self.cancel.clone());
        if let Some(observer) = &self.progress {
            runner = runner.with_progress(Arc::clone(observer));
        }
        Ok(runner)
    }

    fn stopped(&self, summary: &mut RunSummary) -> bool {
        if self.cancel.is_cancelled() {
            warn!("Run cancelled; remaining stages will not start");
            summary.cancelled = true;
        }
        summary.cancelled
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("store_override", &self.store.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
