//! Translation cache in front of the translation backend.
//!
//! Lookups are served from an in-memory map first, then from the persistent
//! dictionary, and only then from the backend. The facade never fails: on any
//! backend or store problem the original text is returned and the problem is
//! logged.

use crate::config::CacheConfig;
use crate::dictionary::DictionaryStore;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Errors reported by a translation backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslationError {
    #[error("Translation backend not ready")]
    NotReady,

    #[error("Translation failed: {0}")]
    Backend(String),

    #[error("Translation timed out after {0:?}")]
    Timeout(Duration),
}

/// Machine translation service
#[async_trait::async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Whether the backend can accept requests (e.g. model downloaded)
    fn is_ready(&self) -> bool;

    async fn translate(&self, text: &str) -> Result<String, TranslationError>;
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// In-memory entries
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub user_dictionary_size: usize,
}

/// Synchronous cache with asynchronous miss handling
pub struct TranslationCache {
    backend: Arc<dyn TranslationBackend>,
    store: Arc<dyn DictionaryStore>,
    memory: DashMap<String, String>,
    max_memory_entries: usize,
    timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    /// Create the cache and warm it from the persistent dictionary
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        store: Arc<dyn DictionaryStore>,
        config: &CacheConfig,
    ) -> Self {
        let cache = Self {
            backend,
            store,
            memory: DashMap::new(),
            max_memory_entries: config.max_memory_entries,
            timeout: Duration::from_millis(config.translate_timeout_ms.max(1)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        cache.warm_from_store();
        cache
    }

    fn warm_from_store(&self) {
        match self.store.list_all() {
            Ok(entries) => {
                let mut loaded = 0;
                for entry in entries {
                    if self.cache_in_memory(&entry.source_text, &entry.translated_text) {
                        loaded += 1;
                    }
                }
                debug!("Loaded {} dictionary entries into memory", loaded);
            }
            Err(e) => warn!("Failed to load dictionary: {}", e),
        }
    }

    /// Translate text, falling back to the input on any failure
    pub async fn translate(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        if let Some(cached) = self.memory.get(text).map(|v| v.value().clone()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.record_usage(text);
            return cached;
        }

        // Persistent entries that did not fit in memory
        match self.store.get(text) {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.record_usage(text);
                self.cache_in_memory(text, &entry.translated_text);
                return entry.translated_text;
            }
            Ok(None) => {}
            Err(e) => warn!("Dictionary lookup failed: {}", e),
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        match self.call_backend(text).await {
            Ok(translated) => {
                self.cache_in_memory(text, &translated);
                if let Err(e) = self.store.upsert(text, &translated, false) {
                    warn!("Failed to persist translation: {}", e);
                }
                translated
            }
            Err(TranslationError::NotReady) => {
                trace!("Backend not ready, showing original text");
                text.to_string()
            }
            Err(e) => {
                warn!("{}", e);
                text.to_string()
            }
        }
    }

    async fn call_backend(&self, text: &str) -> Result<String, TranslationError> {
        if !self.backend.is_ready() {
            return Err(TranslationError::NotReady);
        }

        let translated = tokio::time::timeout(self.timeout, self.backend.translate(text))
            .await
            .map_err(|_| TranslationError::Timeout(self.timeout))??;

        if translated.trim().is_empty() {
            return Err(TranslationError::Backend("empty translation".to_string()));
        }
        Ok(translated)
    }

    fn record_usage(&self, text: &str) {
        if let Err(e) = self.store.increment_usage(text) {
            warn!("Failed to record dictionary usage: {}", e);
        }
    }

    /// Insert unless the memory cache is full. Returns whether the entry is cached.
    fn cache_in_memory(&self, text: &str, translated: &str) -> bool {
        if self.memory.len() >= self.max_memory_entries && !self.memory.contains_key(text) {
            return false;
        }
        self.memory.insert(text.to_string(), translated.to_string());
        true
    }

    pub fn is_cached(&self, text: &str) -> bool {
        self.memory.contains_key(text)
    }

    pub fn get_cached(&self, text: &str) -> Option<String> {
        self.memory.get(text).map(|v| v.value().clone())
    }

    /// Seed the memory cache. Returns how many entries were accepted.
    pub fn preload_translations(&self, translations: HashMap<String, String>) -> usize {
        translations
            .iter()
            .filter(|(source, translated)| self.cache_in_memory(source, translated))
            .count()
    }

    /// Drop all memory entries and reset the counters
    pub fn clear_cache(&self) {
        self.memory.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn cache_stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        let user_dictionary_size = match self.store.count_user_defined() {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to read dictionary: {}", e);
                0
            }
        };

        CacheStats {
            size: self.memory.len(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            user_dictionary_size,
        }
    }
}
