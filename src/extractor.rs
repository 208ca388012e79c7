//! Candidate text extraction from UI-tree snapshots.
//!
//! The extractor walks a snapshot depth-first in preorder and yields the nodes
//! that look like translatable on-screen text. The walk is capped at
//! `max_nodes_per_frame` candidates; nodes past the cap are dropped in
//! traversal order, not by priority.

use crate::config::ExtractionConfig;
use crate::types::{contains_cjk, CandidateNode, NodeError, Rect};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{debug, trace};

/// Read access to one node of a UI tree.
///
/// Platform implementations may fail on any call when the underlying node
/// disappears mid-walk; such nodes are skipped.
pub trait AccessibleNode: Clone {
    fn text(&self) -> Result<Option<String>, NodeError>;

    fn screen_bounds(&self) -> Result<Rect, NodeError>;

    fn stable_key(&self) -> Option<String>;

    fn children(&self) -> Result<Cow<'_, [Self]>, NodeError>;
}

/// Owned snapshot node, used for recorded snapshots and tests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub screen_bounds: Rect,
    #[serde(default)]
    pub stable_key: Option<String>,
    #[serde(default)]
    pub children: Vec<UiNode>,
}

impl UiNode {
    /// Container node without text
    pub fn container(children: Vec<UiNode>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    /// Leaf text node
    pub fn label(text: &str, bounds: Rect) -> Self {
        Self {
            text: Some(text.to_string()),
            screen_bounds: bounds,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.stable_key = Some(key.to_string());
        self
    }
}

impl AccessibleNode for UiNode {
    fn text(&self) -> Result<Option<String>, NodeError> {
        Ok(self.text.clone())
    }

    fn screen_bounds(&self) -> Result<Rect, NodeError> {
        Ok(self.screen_bounds)
    }

    fn stable_key(&self) -> Option<String> {
        self.stable_key.clone()
    }

    fn children(&self) -> Result<Cow<'_, [Self]>, NodeError> {
        Ok(Cow::Borrowed(&self.children))
    }
}

/// State of one traversal
#[derive(Debug, Default)]
struct Walk {
    candidates: Vec<CandidateNode>,
    /// Subtrees pruned by the depth limit
    depth_cutoffs: usize,
}

/// Filters and collects candidate nodes from a snapshot
#[derive(Debug, Clone)]
pub struct ElementExtractor {
    config: ExtractionConfig,
}

impl ElementExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Walk the tree and collect candidates in preorder
    pub fn extract<N: AccessibleNode>(&self, root: &N) -> Vec<CandidateNode> {
        let walk = self.walk(root);
        if walk.depth_cutoffs > 0 {
            debug!(
                "Depth limit {} pruned {} subtrees",
                self.config.max_depth, walk.depth_cutoffs
            );
        }
        trace!("Extracted {} candidate nodes", walk.candidates.len());
        walk.candidates
    }

    fn walk<N: AccessibleNode>(&self, root: &N) -> Walk {
        let mut walk = Walk::default();
        self.extract_recursive(root, 0, &mut walk);
        walk
    }

    fn extract_recursive<N: AccessibleNode>(&self, node: &N, depth: usize, walk: &mut Walk) {
        if walk.candidates.len() >= self.config.max_nodes_per_frame {
            return;
        }

        if depth > self.config.max_depth {
            walk.depth_cutoffs += 1;
            return;
        }

        match self.candidate_from(node, depth) {
            Ok(Some(candidate)) => walk.candidates.push(candidate),
            Ok(None) => {}
            Err(e) => {
                // The node vanished mid-walk; its subtree is gone with it
                trace!("Skipping node at depth {}: {}", depth, e);
                return;
            }
        }

        let children = match node.children() {
            Ok(children) => children,
            Err(e) => {
                trace!("Skipping children at depth {}: {}", depth, e);
                return;
            }
        };

        for child in children.iter() {
            if walk.candidates.len() >= self.config.max_nodes_per_frame {
                break;
            }
            self.extract_recursive(child, depth + 1, walk);
        }
    }

    fn candidate_from<N: AccessibleNode>(
        &self,
        node: &N,
        depth: usize,
    ) -> Result<Option<CandidateNode>, NodeError> {
        let text = match node.text()? {
            Some(text) => text,
            None => return Ok(None),
        };

        let trimmed = text.trim();
        if trimmed.is_empty() || !contains_cjk(trimmed) {
            return Ok(None);
        }

        let bounds = node.screen_bounds()?;
        if !self.bounds_acceptable(&bounds) {
            return Ok(None);
        }

        Ok(Some(CandidateNode {
            text: trimmed.to_string(),
            bounds,
            stable_key: node.stable_key(),
            depth,
        }))
    }

    fn bounds_acceptable(&self, bounds: &Rect) -> bool {
        bounds.width() > self.config.min_element_size
            && bounds.height() > self.config.min_element_size
            && bounds.is_within(self.config.max_coordinate)
    }
}

impl Default for ElementExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(text: &str, top: f32) -> UiNode {
        UiNode::label(text, Rect::new(10.0, top, 210.0, top + 30.0))
    }

    #[test]
    fn test_preorder_with_depth() {
        let root = UiNode::container(vec![
            UiNode {
                children: vec![line("子项", 100.0)],
                ..line("父项", 50.0)
            },
            line("兄弟", 150.0),
        ]);

        let candidates = ElementExtractor::default().extract(&root);
        let seen: Vec<_> = candidates
            .iter()
            .map(|c| (c.text.as_str(), c.depth))
            .collect();
        assert_eq!(seen, vec![("父项", 1), ("子项", 2), ("兄弟", 1)]);
    }

    #[test]
    fn test_text_filters() {
        let root = UiNode::container(vec![
            line("English only", 0.0),
            line("   ", 40.0),
            line("  混合 text  ", 80.0),
            UiNode::container(vec![]),
        ]);

        let candidates = ElementExtractor::default().extract(&root);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "混合 text");
    }

    #[test]
    fn test_bounds_filters() {
        let root = UiNode::container(vec![
            UiNode::label("太小", Rect::new(0.0, 0.0, 10.0, 30.0)),
            UiNode::label("太矮", Rect::new(0.0, 0.0, 100.0, 10.0)),
            UiNode::label("屏外", Rect::new(-50.0, 0.0, 100.0, 30.0)),
            UiNode::label("太远", Rect::new(4000.0, 0.0, 4100.0, 30.0)),
            UiNode::label("正好", Rect::new(0.0, 0.0, 10.5, 10.5)),
        ]);

        let candidates = ElementExtractor::default().extract(&root);
        let texts: Vec<_> = candidates.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["正好"]);
    }

    #[test]
    fn test_node_cap_drops_in_traversal_order() {
        let config = ExtractionConfig {
            max_nodes_per_frame: 3,
            ..ExtractionConfig::default()
        };
        let nodes = (0..10).map(|i| line("文本", i as f32 * 40.0).with_key(&i.to_string()));
        let root = UiNode::container(nodes.collect());

        let candidates = ElementExtractor::new(config).extract(&root);
        let keys: Vec<_> = candidates
            .iter()
            .filter_map(|c| c.stable_key.as_deref())
            .collect();
        assert_eq!(keys, vec!["0", "1", "2"]);
    }

    #[test]
    fn test_depth_limit() {
        let config = ExtractionConfig {
            max_depth: 2,
            ..ExtractionConfig::default()
        };
        let mut node = line("最深", 0.0);
        for _ in 0..5 {
            node = UiNode::container(vec![node]);
        }

        assert!(ElementExtractor::new(config).extract(&node).is_empty());
    }

    #[test]
    fn test_depth_cutoffs_counted_per_walk() {
        let config = ExtractionConfig {
            max_depth: 1,
            ..ExtractionConfig::default()
        };
        let deep = || UiNode::container(vec![UiNode::container(vec![line("最深", 0.0)])]);
        let root = UiNode::container(vec![deep(), line("浅层", 40.0), deep()]);

        let extractor = ElementExtractor::new(config);
        let walk = extractor.walk(&root);
        assert_eq!(walk.depth_cutoffs, 2);
        assert_eq!(walk.candidates.len(), 1);
        assert_eq!(walk.candidates[0].text, "浅层");

        // A fresh walk starts its count over
        assert_eq!(extractor.walk(&root).depth_cutoffs, 2);
    }

    #[derive(Clone)]
    struct FlakyNode {
        vanished: bool,
        text: &'static str,
        children: Vec<FlakyNode>,
    }

    impl AccessibleNode for FlakyNode {
        fn text(&self) -> Result<Option<String>, NodeError> {
            if self.vanished {
                return Err(NodeError::Vanished);
            }
            Ok(Some(self.text.to_string()))
        }

        fn screen_bounds(&self) -> Result<Rect, NodeError> {
            Ok(Rect::new(0.0, 0.0, 100.0, 30.0))
        }

        fn stable_key(&self) -> Option<String> {
            None
        }

        fn children(&self) -> Result<Cow<'_, [Self]>, NodeError> {
            Ok(Cow::Owned(self.children.clone()))
        }
    }

    #[test]
    fn test_vanished_node_is_skipped() {
        let root = FlakyNode {
            vanished: false,
            text: "",
            children: vec![
                FlakyNode {
                    vanished: true,
                    text: "消失",
                    children: vec![],
                },
                FlakyNode {
                    vanished: false,
                    text: "存在",
                    children: vec![],
                },
            ],
        };

        let candidates = ElementExtractor::default().extract(&root);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "存在");
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let json = r#"{
            "children": [
                { "text": "设置", "screen_bounds": { "left": 0, "top": 0, "right": 120, "bottom": 40 }, "stable_key": "menu.settings" }
            ]
        }"#;
        let root: UiNode = serde_json::from_str(json).unwrap();
        let candidates = ElementExtractor::default().extract(&root);
        assert_eq!(candidates[0].stable_key.as_deref(), Some("menu.settings"));
        assert_eq!(candidates[0].bounds.height(), 40.0);
    }
}
