//! One processing pass: extract, resolve identities, package the frame.
//!
//! The pipeline owns its predictor pool and element tracker. Nothing here is
//! global: every collaborator is handed in at construction.

use crate::config::Config;
use crate::dictionary::{DictionaryStore, MemoryDictionary, SqliteDictionary};
use crate::extractor::{AccessibleNode, ElementExtractor};
use crate::pool::{ObjectPool, PoolStats};
use crate::predictor::{MotionPredictor, PredictorParams};
use crate::render::{FontFitter, FrameOutput, FramePackager, Theme};
use crate::scheduler::CancellationToken;
use crate::tracker::ElementTracker;
use crate::translation::{CacheStats, TranslationBackend, TranslationCache};
use crate::types::PipelineError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Result of a pass that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(FrameOutput),
    /// Superseded by a newer pass; no frame was packaged
    Cancelled,
}

/// Debug surface
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub tracked_elements: usize,
    /// Elements above the configured fast-scroll speed
    pub fast_scrolling: usize,
    pub pool: PoolStats,
    pub cache: CacheStats,
}

pub struct OverlayPipeline {
    extractor: ElementExtractor,
    tracker: ElementTracker,
    packager: FramePackager,
    pool: Arc<ObjectPool<MotionPredictor>>,
    translator: Arc<TranslationCache>,
    fast_scroll_threshold: f32,
}

impl OverlayPipeline {
    /// Assemble a pipeline from explicit parts
    pub fn new(
        config: &Config,
        pool: Arc<ObjectPool<MotionPredictor>>,
        translator: Arc<TranslationCache>,
    ) -> Self {
        let tracker = ElementTracker::new(
            pool.clone(),
            translator.clone(),
            FontFitter::new(config.font.clone()),
            config.timing.element_timeout_ms,
        );

        Self {
            extractor: ElementExtractor::new(config.extraction.clone()),
            tracker,
            packager: FramePackager::new(),
            pool,
            translator,
            fast_scroll_threshold: config.prediction.fast_scroll_threshold,
        }
    }

    /// Build the pool and translation cache from configuration.
    ///
    /// Opens the SQLite dictionary when `cache.dictionary_path` is set, an
    /// in-memory one otherwise.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn TranslationBackend>,
    ) -> Result<Self, PipelineError> {
        let store: Arc<dyn DictionaryStore> = match &config.cache.dictionary_path {
            Some(path) => {
                info!("Opening dictionary at {}", path);
                Arc::new(SqliteDictionary::open(path)?)
            }
            None => Arc::new(MemoryDictionary::new()),
        };
        Ok(Self::with_store(config, backend, store))
    }

    pub fn with_store(
        config: &Config,
        backend: Arc<dyn TranslationBackend>,
        store: Arc<dyn DictionaryStore>,
    ) -> Self {
        let pool = Arc::new(predictor_pool(config));
        let translator = Arc::new(TranslationCache::new(backend, store, &config.cache));
        Self::new(config, pool, translator)
    }

    /// Run one pass over a snapshot.
    ///
    /// A cancelled pass returns [`PassOutcome::Cancelled`] and never reaches
    /// the packager.
    pub async fn run_pass<N: AccessibleNode>(
        &self,
        root: &N,
        now_ms: u64,
        theme: &Theme,
        token: &CancellationToken,
    ) -> Result<PassOutcome, PipelineError> {
        // A root that cannot list its children is not a usable snapshot
        root.children()?;

        let candidates = self.extractor.extract(root);
        let resolution = self.tracker.resolve_frame(&candidates, now_ms, token).await;

        if resolution.cancelled || token.is_cancelled() {
            return Ok(PassOutcome::Cancelled);
        }

        trace!(
            "Pass at {}ms: {} created, {} updated, {} expired",
            now_ms,
            resolution.created,
            resolution.updated,
            resolution.destroyed.len()
        );

        let frame = self.current_frame(theme, now_ms);
        debug!("Packaged frame with {} elements", frame.len());
        Ok(PassOutcome::Completed(frame))
    }

    /// Package the table as it stands
    pub fn current_frame(&self, theme: &Theme, now_ms: u64) -> FrameOutput {
        let elements = self.tracker.snapshot();
        self.packager.package(&elements, theme, now_ms)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            tracked_elements: self.tracker.len(),
            fast_scrolling: self.tracker.count_fast_scrolling(self.fast_scroll_threshold),
            pool: self.pool.stats(),
            cache: self.translator.cache_stats(),
        }
    }

    pub fn tracker(&self) -> &ElementTracker {
        &self.tracker
    }

    pub fn translator(&self) -> &Arc<TranslationCache> {
        &self.translator
    }

    pub fn pool(&self) -> &Arc<ObjectPool<MotionPredictor>> {
        &self.pool
    }
}

/// Predictor pool sized and prefilled from configuration
pub fn predictor_pool(config: &Config) -> ObjectPool<MotionPredictor> {
    let params = PredictorParams::from(&config.prediction);
    let pool = ObjectPool::new(config.pool.max_size, move || MotionPredictor::new(params));
    let added = pool.prefill(config.pool.prefill);
    debug!("Prefilled predictor pool with {} instances", added);
    pool
}
