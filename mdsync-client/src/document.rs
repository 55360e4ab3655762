//! The local document buffer.
//!
//! One text value owned by this client. Local input and inbound `init` /
//! `update` frames both write it; an inbound frame always wins outright.
//! Offsets are UTF-16 code units.

/// Number of UTF-16 code units in `text`.
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDocument {
    text: String,
    caret: usize,
    rendered_html: Option<String>,
}

impl LocalDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    /// Last preview the server rendered, if any.
    pub fn rendered_html(&self) -> Option<&str> {
        self.rendered_html.as_deref()
    }

    /// Replace the text from local input. Returns `true` if it changed.
    pub fn set_local(&mut self, text: impl Into<String>, caret: usize) -> bool {
        let text = text.into();
        let changed = text != self.text;
        self.text = text;
        self.set_caret(caret);
        changed
    }

    /// Move the caret, clamped to the end of the text.
    pub fn set_caret(&mut self, caret: usize) -> usize {
        self.caret = caret.min(utf16_len(&self.text));
        self.caret
    }

    /// Overwrite with remote content. Identical content leaves the buffer
    /// and caret untouched; otherwise the caret stays at the same numeric
    /// offset, clamped. Returns `true` if the text changed.
    pub fn apply_remote(&mut self, content: &str) -> bool {
        if content == self.text {
            return false;
        }
        self.text = content.to_owned();
        self.set_caret(self.caret);
        true
    }

    pub fn set_preview(&mut self, rendered_html: Option<String>) {
        self.rendered_html = rendered_html;
    }
}
