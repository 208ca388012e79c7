//! Identity resolution and lifecycle of tracked elements.
//!
//! Records live in an arena keyed by integer handles, with a separate
//! id-to-handle index. Handles are never reused, so a handle read from the
//! index always names either the intended record or nothing.
//!
//! Every record write is a single map operation. A pass that is cancelled
//! halfway leaves each record either fully updated or untouched.

use crate::pool::ObjectPool;
use crate::predictor::MotionPredictor;
use crate::render::FontFitter;
use crate::scheduler::CancellationToken;
use crate::translation::TranslationCache;
use crate::types::{CandidateNode, ElementHandle, ElementId, TrackedElement};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Arena of tracked element records
#[derive(Debug, Default)]
pub struct ElementTable {
    records: DashMap<ElementHandle, TrackedElement>,
    index: DashMap<ElementId, ElementHandle>,
    next_handle: AtomicU64,
}

impl ElementTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn handle_of(&self, id: &str) -> Option<ElementHandle> {
        self.index.get(id).map(|h| *h)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<TrackedElement> {
        let handle = self.handle_of(id)?;
        self.records.get(&handle).map(|r| r.value().clone())
    }

    /// Insert a record, replacing any record with the same id
    pub fn insert(&self, element: TrackedElement) -> ElementHandle {
        if let Some(handle) = self.handle_of(&element.id) {
            self.records.insert(handle, element);
            return handle;
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let id = element.id.clone();
        // Record first, so an index hit always resolves
        self.records.insert(handle, element);
        self.index.insert(id, handle);
        handle
    }

    /// Apply `f` to the record under the record's shard lock.
    ///
    /// Returns `false` if no record has this id.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut TrackedElement),
    {
        let Some(handle) = self.handle_of(id) else {
            return false;
        };
        match self.records.get_mut(&handle) {
            Some(mut record) => {
                f(record.value_mut());
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<TrackedElement> {
        let (_, handle) = self.index.remove(id)?;
        self.records.remove(&handle).map(|(_, record)| record)
    }

    /// Copy of all records in creation order
    pub fn snapshot(&self) -> Vec<TrackedElement> {
        let mut entries: Vec<(ElementHandle, TrackedElement)> = self
            .records
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        entries.sort_by_key(|(handle, _)| *handle);
        entries.into_iter().map(|(_, record)| record).collect()
    }

    /// Ids with their last-seen times
    fn last_seen(&self) -> Vec<(ElementId, u64)> {
        self.records
            .iter()
            .map(|r| (r.value().id.clone(), r.value().last_seen_ms))
            .collect()
    }
}

/// What one frame did to the table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameResolution {
    pub created: usize,
    pub updated: usize,
    /// Ids removed by the expiry sweep
    pub destroyed: Vec<ElementId>,
    /// The pass stopped early; the sweep did not run
    pub cancelled: bool,
}

/// Maps extracted nodes to persistent element records
pub struct ElementTracker {
    table: ElementTable,
    predictors: DashMap<ElementId, MotionPredictor>,
    pool: Arc<ObjectPool<MotionPredictor>>,
    translator: Arc<TranslationCache>,
    fitter: FontFitter,
    element_timeout_ms: u64,
}

impl ElementTracker {
    pub fn new(
        pool: Arc<ObjectPool<MotionPredictor>>,
        translator: Arc<TranslationCache>,
        fitter: FontFitter,
        element_timeout_ms: u64,
    ) -> Self {
        Self {
            table: ElementTable::new(),
            predictors: DashMap::new(),
            pool,
            translator,
            fitter,
            element_timeout_ms,
        }
    }

    /// Apply one frame's candidates, then expire stale records.
    ///
    /// `token` is checked after each node. When it fires, records committed so
    /// far stay in place and the sweep is skipped.
    pub async fn resolve_frame(
        &self,
        candidates: &[CandidateNode],
        now_ms: u64,
        token: &CancellationToken,
    ) -> FrameResolution {
        let mut resolution = FrameResolution::default();
        let mut seen: HashSet<ElementId> = HashSet::with_capacity(candidates.len());

        for candidate in candidates {
            let id = candidate.element_id();
            if !seen.insert(id.clone()) {
                trace!("Duplicate element {} in frame, skipping", id);
                continue;
            }

            if self.table.contains(&id) {
                self.update_element(&id, candidate, now_ms);
                resolution.updated += 1;
            } else {
                self.create_element(id, candidate, now_ms).await;
                resolution.created += 1;
            }

            if token.is_cancelled() {
                debug!(
                    "Pass cancelled after {} of {} nodes",
                    resolution.created + resolution.updated,
                    candidates.len()
                );
                resolution.cancelled = true;
                return resolution;
            }
        }

        resolution.destroyed = self.sweep(&seen, now_ms);
        resolution
    }

    fn update_element(&self, id: &str, candidate: &CandidateNode, now_ms: u64) {
        let bounds = candidate.bounds;
        let forecast = self
            .predictors
            .get_mut(id)
            .map(|mut p| p.update(bounds.left, bounds.top, now_ms));

        let (_, predicted_y) = match forecast {
            Some(forecast) => forecast,
            None => {
                // Record without a predictor: start a fresh one
                let mut predictor = self.pool.acquire();
                let forecast = predictor.update(bounds.left, bounds.top, now_ms);
                self.predictors.insert(id.to_string(), predictor);
                forecast
            }
        };

        self.table.update(id, |element| {
            element.bounds = bounds;
            element.predicted_y = predicted_y;
            element.last_seen_ms = element.last_seen_ms.max(now_ms);
        });
    }

    async fn create_element(&self, id: ElementId, candidate: &CandidateNode, now_ms: u64) {
        let translated_text = self.translator.translate(&candidate.text).await;
        let font_size = self.fitter.fit(&translated_text, &candidate.bounds);

        let bounds = candidate.bounds;
        let mut predictor = self.pool.acquire();
        let (_, predicted_y) = predictor.update(bounds.left, bounds.top, now_ms);
        self.predictors.insert(id.clone(), predictor);

        debug!("Tracking element {}: {:?}", id, candidate.text);
        self.table.insert(TrackedElement {
            id,
            original_text: candidate.text.clone(),
            translated_text,
            bounds,
            predicted_y,
            last_seen_ms: now_ms,
            font_size,
        });
    }

    /// Remove records not in `seen` whose age exceeds the element timeout.
    /// Their predictors go back to the pool.
    pub fn sweep(&self, seen: &HashSet<ElementId>, now_ms: u64) -> Vec<ElementId> {
        let expired: Vec<ElementId> = self
            .table
            .last_seen()
            .into_iter()
            .filter(|(id, last_seen)| {
                !seen.contains(id) && now_ms.saturating_sub(*last_seen) > self.element_timeout_ms
            })
            .map(|(id, _)| id)
            .collect();

        for id in &expired {
            self.table.remove(id);
            if let Some((_, predictor)) = self.predictors.remove(id) {
                self.pool.release(predictor);
            }
            trace!("Expired element {}", id);
        }

        if !expired.is_empty() {
            debug!("Expired {} elements", expired.len());
        }
        expired
    }

    /// Copy of the current table, in creation order
    pub fn snapshot(&self) -> Vec<TrackedElement> {
        self.table.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<TrackedElement> {
        self.table.get(id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Velocity estimate for an element, in units per second
    pub fn velocity_of(&self, id: &str) -> Option<(f32, f32)> {
        self.predictors.get(id).map(|p| p.velocity())
    }

    pub fn is_fast_scrolling(&self, id: &str, threshold: f32) -> bool {
        self.predictors
            .get(id)
            .map(|p| p.is_fast_scrolling(threshold))
            .unwrap_or(false)
    }

    /// Elements currently moving faster than `threshold` units per second
    pub fn count_fast_scrolling(&self, threshold: f32) -> usize {
        self.predictors
            .iter()
            .filter(|p| p.value().is_fast_scrolling(threshold))
            .count()
    }

    pub fn element_timeout_ms(&self) -> u64 {
        self.element_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::dictionary::MemoryDictionary;
    use crate::translation::{TranslationBackend, TranslationError};
    use crate::types::Rect;
    use pretty_assertions::assert_eq;

    struct Glossary;

    #[async_trait::async_trait]
    impl TranslationBackend for Glossary {
        fn is_ready(&self) -> bool {
            true
        }

        async fn translate(&self, text: &str) -> Result<String, TranslationError> {
            match text {
                "设置" => Ok("Settings".to_string()),
                "测试" => Ok("Тест".to_string()),
                _ => Err(TranslationError::Backend(format!("no entry for {}", text))),
            }
        }
    }

    fn tracker() -> (ElementTracker, Arc<ObjectPool<MotionPredictor>>) {
        let pool = Arc::new(ObjectPool::new(8, MotionPredictor::default));
        let cache = TranslationCache::new(
            Arc::new(Glossary),
            Arc::new(MemoryDictionary::new()),
            &CacheConfig::default(),
        );
        let tracker = ElementTracker::new(
            pool.clone(),
            Arc::new(cache),
            FontFitter::default(),
            500,
        );
        (tracker, pool)
    }

    fn node(text: &str, top: f32) -> CandidateNode {
        CandidateNode {
            text: text.to_string(),
            bounds: Rect::new(100.0, top, 300.0, top + 30.0),
            stable_key: None,
            depth: 1,
        }
    }

    #[test]
    fn test_table_insert_update_remove() {
        let table = ElementTable::new();
        let element = TrackedElement {
            id: "a".to_string(),
            original_text: "设置".to_string(),
            translated_text: "Settings".to_string(),
            bounds: Rect::new(0.0, 0.0, 100.0, 20.0),
            predicted_y: 0.0,
            last_seen_ms: 10,
            font_size: 40.0,
        };

        let handle = table.insert(element.clone());
        assert_eq!(table.handle_of("a"), Some(handle));
        assert_eq!(table.insert(element.clone()), handle);
        assert_eq!(table.len(), 1);

        assert!(table.update("a", |e| e.last_seen_ms = 20));
        assert!(!table.update("missing", |e| e.last_seen_ms = 20));
        assert_eq!(table.get("a").unwrap().last_seen_ms, 20);

        assert_eq!(table.remove("a").unwrap().id, "a");
        assert!(table.is_empty());
        assert!(table.get("a").is_none());

        // Handles are not reused
        assert_ne!(table.insert(element), handle);
    }

    #[test]
    fn test_table_snapshot_in_creation_order() {
        let table = ElementTable::new();
        for id in ["c", "a", "b"] {
            table.insert(TrackedElement {
                id: id.to_string(),
                original_text: String::new(),
                translated_text: String::new(),
                bounds: Rect::default(),
                predicted_y: 0.0,
                last_seen_ms: 0,
                font_size: 30.0,
            });
        }
        let ids: Vec<_> = table.snapshot().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_creation_translates_and_fits() {
        let (tracker, pool) = tracker();
        let token = CancellationToken::new();

        let resolution = tracker.resolve_frame(&[node("测试", 200.0)], 1_000, &token).await;
        assert_eq!(resolution.created, 1);
        assert!(!resolution.cancelled);

        let element = &tracker.snapshot()[0];
        assert_eq!(element.translated_text, "Тест");
        assert_eq!(element.font_size, 60.0);
        assert_eq!(element.predicted_y, 200.0);
        assert_eq!(element.last_seen_ms, 1_000);
        assert_eq!(pool.stats().acquires, 1);
    }

    #[tokio::test]
    async fn test_failed_translation_keeps_original() {
        let (tracker, _) = tracker();
        tracker
            .resolve_frame(&[node("未知", 0.0)], 0, &CancellationToken::new())
            .await;
        assert_eq!(tracker.snapshot()[0].translated_text, "未知");
    }

    #[tokio::test]
    async fn test_update_moves_element_and_keeps_translation() {
        let (tracker, _) = tracker();
        let token = CancellationToken::new();

        tracker.resolve_frame(&[node("设置", 100.0)], 0, &token).await;
        let resolution = tracker.resolve_frame(&[node("设置", 200.0)], 100, &token).await;

        assert_eq!(resolution.updated, 1);
        assert_eq!(resolution.created, 0);
        assert_eq!(tracker.len(), 1);

        let element = &tracker.snapshot()[0];
        assert_eq!(element.bounds.top, 200.0);
        assert!(element.predicted_y > 200.0);
        assert_eq!(element.translated_text, "Settings");
        assert!(tracker.velocity_of(&element.id).unwrap().1 > 0.0);
        assert!(tracker.is_fast_scrolling(&element.id, 500.0));
        assert_eq!(tracker.count_fast_scrolling(500.0), 1);
        assert_eq!(tracker.count_fast_scrolling(1e6), 0);
    }

    #[tokio::test]
    async fn test_expiry_hysteresis_releases_predictor() {
        let (tracker, pool) = tracker();
        let token = CancellationToken::new();

        tracker.resolve_frame(&[node("设置", 100.0)], 0, &token).await;

        // Missing, but within the timeout
        let resolution = tracker.resolve_frame(&[], 400, &token).await;
        assert!(resolution.destroyed.is_empty());
        assert_eq!(tracker.len(), 1);

        // Exactly at the timeout is still retained
        assert!(tracker.resolve_frame(&[], 500, &token).await.destroyed.is_empty());

        let resolution = tracker.resolve_frame(&[], 501, &token).await;
        assert_eq!(resolution.destroyed.len(), 1);
        assert!(tracker.is_empty());
        assert_eq!(pool.stats().releases, 1);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_last_seen_never_decreases() {
        let (tracker, _) = tracker();
        let token = CancellationToken::new();

        tracker.resolve_frame(&[node("设置", 100.0)], 1_000, &token).await;
        tracker.resolve_frame(&[node("设置", 110.0)], 900, &token).await;

        assert_eq!(tracker.snapshot()[0].last_seen_ms, 1_000);
    }

    #[tokio::test]
    async fn test_cancelled_pass_keeps_committed_elements() {
        let (tracker, _) = tracker();
        let token = CancellationToken::new();
        token.cancel();

        let resolution = tracker
            .resolve_frame(&[node("设置", 100.0), node("测试", 200.0)], 0, &token)
            .await;

        assert!(resolution.cancelled);
        assert_eq!(resolution.created, 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.snapshot()[0].original_text, "设置");
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_frame_are_processed_once() {
        let (tracker, pool) = tracker();
        let resolution = tracker
            .resolve_frame(
                &[node("设置", 100.0), node("设置", 300.0)],
                0,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(resolution.created, 1);
        assert_eq!(resolution.updated, 0);
        assert_eq!(pool.stats().acquires, 1);
    }
}
