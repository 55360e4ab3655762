//! Presence: remote carets, their colors, and where they land in the text.
//!
//! ## Data flow
//!
//! ```text
//! cursor frame { userId, position }
//!       │
//!       ▼
//! CursorRegistry::update_cursor()   (color derived from userId)
//!       │
//!       ▼
//! CursorRegistry::other_cursors()   (self excluded)
//!       │
//!       ▼
//! build_cursor_overlay()            (offset → line/column → pixels)
//! ```
//!
//! Offsets and columns are counted in UTF-16 code units, the unit browser
//! peers use for caret positions.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

// ───────────────────────────────────────────────────────────────────
// Colors
// ───────────────────────────────────────────────────────────────────

/// HSL color assigned to a user's caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CursorColor {
    /// Degrees, `0..360`.
    pub hue: u16,
    /// Percent, `70..90`.
    pub saturation: u8,
    /// Percent, `45..65`.
    pub lightness: u8,
}

impl CursorColor {
    /// Derive the color for `user_id`.
    ///
    /// Deterministic: every client computes the same color for the same id
    /// without exchanging any state. Distinct ids may collide.
    pub fn for_user(user_id: &str) -> Self {
        let magnitude = user_hash(user_id).unsigned_abs();
        Self {
            hue: (magnitude % 360) as u16,
            saturation: 70 + (magnitude % 20) as u8,
            lightness: 45 + (magnitude % 20) as u8,
        }
    }

    /// Convert to opaque `[r, g, b, a]` floats in `[0, 1]`.
    pub fn to_rgba(&self) -> [f32; 4] {
        let s = f32::from(self.saturation.min(100)) / 100.0;
        let l = f32::from(self.lightness.min(100)) / 100.0;
        let sector = f32::from(self.hue % 360) / 60.0;

        let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let second = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
        let (r, g, b) = match sector as u8 {
            0 => (chroma, second, 0.0),
            1 => (second, chroma, 0.0),
            2 => (0.0, chroma, second),
            3 => (0.0, second, chroma),
            4 => (second, 0.0, chroma),
            _ => (chroma, 0.0, second),
        };
        let m = l - chroma / 2.0;
        [r + m, g + m, b + m, 1.0]
    }
}

impl fmt::Display for CursorColor {
    /// CSS notation, e.g. `hsl(157, 87%, 62%)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsl({}, {}%, {}%)", self.hue, self.saturation, self.lightness)
    }
}

/// Polynomial rolling hash (`h * 31 + unit`) over UTF-16 code units,
/// wrapped to 32 bits at every step.
fn user_hash(user_id: &str) -> i32 {
    user_id
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

// ───────────────────────────────────────────────────────────────────
// Offset mapping
// ───────────────────────────────────────────────────────────────────

/// Zero-based line and column of a caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CursorPosition {
    pub line: usize,
    pub column: usize,
}

impl CursorPosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Map a flat offset in `text` to a line/column pair.
///
/// Offsets past the end clamp to the end of the text. An offset that falls
/// inside a surrogate pair clamps back to the start of that character.
/// Linear in `offset`; recomputed on every render.
pub fn calculate_cursor_position(text: &str, offset: usize) -> CursorPosition {
    let mut position = CursorPosition::default();
    let mut consumed = 0;

    for ch in text.chars() {
        let width = ch.len_utf16();
        if consumed + width > offset {
            break;
        }
        consumed += width;
        if ch == '\n' {
            position.line += 1;
            position.column = 0;
        } else {
            position.column += width;
        }
    }

    position
}

// ───────────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────────

/// A remote user's caret as last reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorInfo {
    pub user_id: String,
    pub position: usize,
    pub color: CursorColor,
}

/// All remote carets known to this client, keyed by user id.
#[derive(Debug, Clone)]
pub struct CursorRegistry {
    local_user_id: String,
    cursors: HashMap<String, CursorInfo>,
}

impl CursorRegistry {
    /// Create an empty registry for the given local user.
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            cursors: HashMap::new(),
        }
    }

    /// Insert or move a user's caret. The color is derived afresh each time.
    pub fn update_cursor(&mut self, user_id: &str, position: usize) {
        let info = CursorInfo {
            user_id: user_id.to_owned(),
            position,
            color: CursorColor::for_user(user_id),
        };
        self.cursors.insert(info.user_id.clone(), info);
    }

    /// Forget a user's caret. Returns the removed entry, if any.
    pub fn remove_cursor(&mut self, user_id: &str) -> Option<CursorInfo> {
        self.cursors.remove(user_id)
    }

    /// Every caret except the local user's, in no particular order.
    pub fn other_cursors(&self) -> impl Iterator<Item = &CursorInfo> + '_ {
        self.cursors
            .values()
            .filter(move |cursor| cursor.user_id != self.local_user_id)
    }

    /// Drop every entry.
    pub fn clear_cursors(&mut self) {
        self.cursors.clear();
    }

    pub fn get(&self, user_id: &str) -> Option<&CursorInfo> {
        self.cursors.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// All entries, self included, sorted by user id (for debugging).
    pub fn all_cursors(&self) -> Vec<&CursorInfo> {
        let mut all: Vec<_> = self.cursors.values().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Lay out the other users' carets over `text`.
    pub fn overlay(&self, text: &str, metrics: &GlyphMetrics) -> Vec<CursorRenderData> {
        build_cursor_overlay(self.other_cursors(), text, metrics)
    }
}

// ───────────────────────────────────────────────────────────────────
// Overlay layout
// ───────────────────────────────────────────────────────────────────

/// Monospace cell size of the editor surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphMetrics {
    pub column_width: f32,
    pub line_height: f32,
}

impl Default for GlyphMetrics {
    fn default() -> Self {
        Self {
            column_width: 8.4,
            line_height: 21.0,
        }
    }
}

/// Data needed to draw a single remote caret.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorRenderData {
    pub user_id: String,
    pub color: CursorColor,
    /// `color` as opaque RGBA, for GPU or canvas renderers.
    pub rgba: [f32; 4],
    pub position: CursorPosition,
    /// Left edge in pixels.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
}

/// Build render data for `cursors`, sorted by user id so overlays stack the
/// same way on every frame.
pub fn build_cursor_overlay<'a>(
    cursors: impl IntoIterator<Item = &'a CursorInfo>,
    text: &str,
    metrics: &GlyphMetrics,
) -> Vec<CursorRenderData> {
    let mut overlay: Vec<CursorRenderData> = cursors
        .into_iter()
        .map(|cursor| {
            let position = calculate_cursor_position(text, cursor.position);
            CursorRenderData {
                user_id: cursor.user_id.clone(),
                color: cursor.color,
                rgba: cursor.color.to_rgba(),
                position,
                x: position.column as f32 * metrics.column_width,
                y: position.line as f32 * metrics.line_height,
            }
        })
        .collect();
    overlay.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    overlay
}

// ===================================================================
// Tests
// ===================================================================
