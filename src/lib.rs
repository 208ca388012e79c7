//! Translation Overlay - real-time element tracking for translated UI overlays
//!
//! This crate observes snapshots of a foreign-language UI tree and produces,
//! per processing pass, a frame for a two-layer renderer:
//!
//! - **Eraser layer**: rectangles that hide the original text
//! - **Text layer**: translated strings with their rectangles and font sizes
//!
//! # Architecture
//!
//! Snapshot notifications are debounced by the [`PassScheduler`], which runs at
//! most one pass at a time. A pass extracts candidate text nodes, resolves them
//! to persistent [`TrackedElement`] records, forecasts each element's position
//! with a [`MotionPredictor`] to hide observation lag while scrolling, and
//! packages a [`FrameOutput`] from one snapshot of the element table.

pub mod config;
pub mod dictionary;
pub mod extractor;
pub mod pipeline;
pub mod pool;
pub mod predictor;
pub mod render;
pub mod scheduler;
pub mod tracker;
pub mod translation;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use dictionary::{DictionaryEntry, DictionaryStore, MemoryDictionary, SqliteDictionary, StoreError};
pub use extractor::{AccessibleNode, ElementExtractor, UiNode};
pub use pipeline::{OverlayPipeline, PassOutcome, PipelineStatus};
pub use pool::{ObjectPool, PoolStats, Poolable};
pub use predictor::{MotionPredictor, PredictorParams, DEFAULT_FAST_SCROLL_THRESHOLD};
pub use render::{FontFitter, FrameOutput, FramePackager, TextItem, Theme};
pub use scheduler::{
    CancellationToken, Clock, Debouncer, ManualClock, MonotonicClock, PassScheduler,
    SchedulerStats, SnapshotSource,
};
pub use tracker::{ElementTable, ElementTracker, FrameResolution};
pub use translation::{CacheStats, TranslationBackend, TranslationCache, TranslationError};
pub use types::{
    derive_element_id, CandidateNode, ElementHandle, ElementId, NodeError, PipelineError, Rect,
    TrackedElement,
};
