//! Core types used throughout the overlay pipeline.
//!
//! This module defines the geometry primitives, the candidate nodes produced by
//! the extractor, the tracked element records, and the error types shared by
//! the pipeline stages.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Persistent identifier of a tracked element (hex digest)
pub type ElementId = String;

/// Stable integer handle of a record in the element arena
pub type ElementHandle = u64;

/// Screen-space rectangle in device-independent units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Same size, moved vertically so that its top edge sits at `top`
    pub fn with_top(&self, top: f32) -> Self {
        Self {
            left: self.left,
            top,
            right: self.right,
            bottom: top + self.height(),
        }
    }

    /// Check that the rectangle lies entirely within `[0, limit]` on both axes
    pub fn is_within(&self, limit: f32) -> bool {
        let in_range = |v: f32| v.is_finite() && (0.0..=limit).contains(&v);
        in_range(self.left) && in_range(self.top) && in_range(self.right) && in_range(self.bottom)
    }
}

/// A text node that passed the extractor's filters
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateNode {
    /// Trimmed node text
    pub text: String,
    /// Screen bounds at observation time
    pub bounds: Rect,
    /// Platform-provided identifier, absent for many nodes
    pub stable_key: Option<String>,
    /// Depth in the UI tree (root = 0)
    pub depth: usize,
}

impl CandidateNode {
    /// Identity of the element this node represents
    pub fn element_id(&self) -> ElementId {
        derive_element_id(self.stable_key.as_deref(), &self.text, &self.bounds)
    }
}

/// One UI text element currently being displayed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedElement {
    pub id: ElementId,
    pub original_text: String,
    pub translated_text: String,
    /// Last observed geometry
    pub bounds: Rect,
    /// Lag-compensated vertical position
    pub predicted_y: f32,
    /// Milliseconds on the pipeline clock when last observed
    pub last_seen_ms: u64,
    /// Computed once at creation
    pub font_size: f32,
}

impl TrackedElement {
    /// Observed bounds shifted to the predicted vertical position
    pub fn predicted_bounds(&self) -> Rect {
        self.bounds.with_top(self.predicted_y)
    }
}

/// Derive the persistent id of an element.
///
/// Inputs are the stable key (tagged as present or absent), the text, and the
/// width and height rounded to whole units. Position is deliberately excluded so that a
/// scrolling element keeps its identity.
pub fn derive_element_id(stable_key: Option<&str>, text: &str, bounds: &Rect) -> ElementId {
    let width = bounds.width().round() as i64;
    let height = bounds.height().round() as i64;

    let mut hasher = Sha256::new();
    match stable_key {
        Some(key) => {
            hasher.update([1u8]);
            hasher.update(key.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    hasher.update([0x1f]);
    hasher.update(format!("{}x{}", width, height).as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    // 64 bits is plenty for the few hundred elements alive at once
    digest[..16].to_string()
}

/// Check whether a character is in the CJK Unified Ideographs, Extension A,
/// or CJK Symbols and Punctuation blocks
pub fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{3000}'..='\u{303F}')
}

/// Check whether text contains at least one CJK character
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

/// Errors raised while reading a UI node
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeError {
    #[error("Node no longer exists")]
    Vanished,

    #[error("Attribute unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abort a processing pass
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Snapshot root unreadable: {0}")]
    Root(#[from] NodeError),

    #[error("Dictionary store error: {0}")]
    Store(#[from] crate::dictionary::StoreError),

    #[error("Pass failed: {0}")]
    Internal(String),
}
