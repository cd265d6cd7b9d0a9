//! crates/course_builder_core/src/accumulator.rs
//!
//! Folds decoded deltas into the growing lesson body.

/// A monotonically growing text buffer fed by stream deltas.
#[derive(Debug, Default, Clone)]
pub struct ContentAccumulator {
    content: String,
    deltas: usize,
}

impl ContentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta and returns the full value accumulated so far.
    pub fn push(&mut self, delta: &str) -> &str {
        self.content.push_str(delta);
        self.deltas += 1;
        &self.content
    }

    pub fn value(&self) -> &str {
        &self.content
    }

    /// Number of deltas accepted.
    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn into_content(self) -> String {
        self.content
    }
}
