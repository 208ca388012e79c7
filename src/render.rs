//! Font sizing and per-frame packaging for the renderer.
//!
//! The renderer draws two layers: an opaque eraser over the original text and
//! the translated text on top. Both layers are built here from one snapshot of
//! the tracked elements, so every eraser rectangle has a matching text item.

use crate::config::{FontConfig, ThemeConfig};
use crate::types::{Rect, TrackedElement};
use serde::Serialize;

/// Perceived luminance below which a text color counts as dark
const LUMINANCE_THRESHOLD: f32 = 128.0;

/// Active overlay styling, passed explicitly into packaging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub text_color: [u8; 3],
}

impl Theme {
    pub fn new(text_color: [u8; 3]) -> Self {
        Self { text_color }
    }

    /// Perceived luminance of the text color on a 0-255 scale
    pub fn text_luminance(&self) -> f32 {
        let [r, g, b] = self.text_color;
        0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
    }

    /// Dark text is drawn over a light eraser background and vice versa
    pub fn is_light_background(&self) -> bool {
        self.text_luminance() < LUMINANCE_THRESHOLD
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::from(&ThemeConfig::default())
    }
}

impl From<&ThemeConfig> for Theme {
    fn from(config: &ThemeConfig) -> Self {
        Self::new(config.text_color)
    }
}

/// One-shot font size heuristic.
///
/// Approximate by nature: the renderer still shrinks or wraps text that does
/// not fit.
#[derive(Debug, Clone)]
pub struct FontFitter {
    config: FontConfig,
}

impl FontFitter {
    pub fn new(config: FontConfig) -> Self {
        Self { config }
    }

    /// Height-based estimate before width correction and clamping
    pub fn height_estimate(&self, bounds: &Rect) -> f32 {
        bounds.height() * self.config.height_multiplier
    }

    pub fn fit(&self, text: &str, bounds: &Rect) -> f32 {
        let mut size = self.height_estimate(bounds);

        let chars = text.chars().count() as f32;
        let required_width = chars * size * self.config.average_char_width_factor;
        let box_width = bounds.width();
        if required_width > box_width && required_width > 0.0 {
            size *= box_width / required_width;
        }

        let min = self.config.min_size.min(self.config.max_size);
        if size.is_finite() {
            size.clamp(min, self.config.max_size)
        } else {
            min
        }
    }
}

impl Default for FontFitter {
    fn default() -> Self {
        Self::new(FontConfig::default())
    }
}

/// Text layer item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextItem {
    pub text: String,
    pub rect: Rect,
    pub font_size: f32,
}

/// Immutable output of one completed processing pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameOutput {
    /// Eraser layer rectangles, in screen pixels
    pub eraser_rects: Vec<Rect>,
    /// Text layer items, parallel to `eraser_rects`
    pub text_items: Vec<TextItem>,
    pub background_is_light: bool,
    /// Pass time on the pipeline clock
    pub timestamp_ms: u64,
}

impl FrameOutput {
    pub fn is_empty(&self) -> bool {
        self.eraser_rects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.eraser_rects.len()
    }
}

/// Builds frame output from a snapshot of tracked elements
#[derive(Debug, Clone, Default)]
pub struct FramePackager;

impl FramePackager {
    pub fn new() -> Self {
        Self
    }

    pub fn package(&self, elements: &[TrackedElement], theme: &Theme, now_ms: u64) -> FrameOutput {
        let mut eraser_rects = Vec::with_capacity(elements.len());
        let mut text_items = Vec::with_capacity(elements.len());

        for element in elements {
            let rect = element.predicted_bounds();
            eraser_rects.push(rect);
            text_items.push(TextItem {
                text: element.translated_text.clone(),
                rect,
                font_size: element.font_size,
            });
        }

        FrameOutput {
            eraser_rects,
            text_items,
            background_is_light: theme.is_light_background(),
            timestamp_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn element(id: &str, text: &str, bounds: Rect, predicted_y: f32) -> TrackedElement {
        TrackedElement {
            id: id.to_string(),
            original_text: "原文".to_string(),
            translated_text: text.to_string(),
            bounds,
            predicted_y,
            last_seen_ms: 0,
            font_size: 42.0,
        }
    }

    #[test]
    fn test_fit_example_box() {
        // 200x30 box, 4-char translation: 30*2.0 = 60, 4*60*0.6 = 144 <= 200
        let bounds = Rect::new(100.0, 200.0, 300.0, 230.0);
        assert_eq!(FontFitter::default().fit("Тест", &bounds), 60.0);
    }

    #[test]
    fn test_fit_scales_down_long_text() {
        let bounds = Rect::new(0.0, 0.0, 200.0, 40.0);
        let fitter = FontFitter::default();
        let size = fitter.fit("A rather long translated sentence", &bounds);
        assert!(size < fitter.height_estimate(&bounds));
        assert_eq!(size, 30.0);
    }

    #[test]
    fn test_fit_clamps_to_max() {
        let bounds = Rect::new(0.0, 0.0, 2000.0, 400.0);
        assert_eq!(FontFitter::default().fit("OK", &bounds), 150.0);
    }

    #[test]
    fn test_fit_empty_text() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 30.0);
        assert_eq!(FontFitter::default().fit("", &bounds), 60.0);
    }

    #[test]
    fn test_theme_luminance() {
        assert!(Theme::new([0, 0, 0]).is_light_background());
        assert!(!Theme::new([255, 255, 255]).is_light_background());
        assert!(!Theme::new([255, 255, 0]).is_light_background());
        assert!(Theme::new([0, 0, 255]).is_light_background());
    }

    #[test]
    fn test_package_uses_predicted_position() {
        let elements = vec![
            element("a", "Settings", Rect::new(10.0, 100.0, 110.0, 130.0), 90.0),
            element("b", "Help", Rect::new(10.0, 200.0, 60.0, 220.0), 200.0),
        ];

        let frame = FramePackager::new().package(&elements, &Theme::new([255, 255, 255]), 1_234);

        assert_eq!(frame.len(), 2);
        assert_eq!(frame.eraser_rects[0], Rect::new(10.0, 90.0, 110.0, 120.0));
        assert_eq!(frame.text_items[0].rect, frame.eraser_rects[0]);
        assert_eq!(frame.text_items[0].text, "Settings");
        assert_eq!(frame.text_items[1].font_size, 42.0);
        assert!(!frame.background_is_light);
        assert_eq!(frame.timestamp_ms, 1_234);
    }

    #[test]
    fn test_package_empty() {
        let frame = FramePackager::new().package(&[], &Theme::default(), 0);
        assert!(frame.is_empty());
        assert!(frame.text_items.is_empty());
        assert!(frame.background_is_light);
    }

    proptest! {
        #[test]
        fn prop_fit_within_range(
            text in ".{0,40}",
            width in 11.0f32..2000.0,
            height in 11.0f32..400.0,
        ) {
            let bounds = Rect::new(0.0, 0.0, width, height);
            let size = FontFitter::default().fit(&text, &bounds);
            prop_assert!((30.0..=150.0).contains(&size));
        }

        #[test]
        fn prop_overflowing_text_shrinks(
            chars in 1usize..60,
            width in 11.0f32..2000.0,
            height in 16.0f32..70.0,
        ) {
            // Height estimate stays inside (min, max] so the shrink is visible
            let text: String = std::iter::repeat('W').take(chars).collect();
            let bounds = Rect::new(0.0, 0.0, width, height);
            let fitter = FontFitter::default();
            let estimate = fitter.height_estimate(&bounds);
            prop_assume!(chars as f32 * estimate * 0.6 > width);
            prop_assert!(fitter.fit(&text, &bounds) < estimate);
        }
    }
}
