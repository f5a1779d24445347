//! Rewindable line buffer for one file.
//!
//! Macro expansion and directive processing can produce multi-line
//! replacement text that must itself be reprocessed line by line, so the
//! cursor supports inserting new lines immediately ahead of the read
//! position. Inserted lines are discounted from the "true" line number
//! used for diagnostics and `__LINE__`.

/// A mutable sequence of lines with forward iteration, lookahead and
/// push-back of generated lines.
#[derive(Clone, Debug)]
pub struct LineCursor {
    lines: Vec<String>,
    /// Number of lines consumed so far.
    pos: usize,
    /// Total number of lines ever inserted via `push`.
    inserted: usize,
}

impl LineCursor {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(String::from).collect(),
            pos: 0,
            inserted: 0,
        }
    }

    // Lookahead surface; the run loop itself only ever steps forward.
    #[allow(dead_code)]
    pub fn has_next(&self) -> bool {
        self.pos < self.lines.len()
    }

    pub fn next(&mut self) -> Option<String> {
        let line = self.lines.get(self.pos).cloned();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    /// Look `n` lines ahead of the read position without consuming.
    /// Lookahead is 1-based; `peek(0)` is nothing.
    #[allow(dead_code)]
    pub fn peek(&self, n: usize) -> Option<&str> {
        self.lines
            .get((self.pos + n).checked_sub(1)?)
            .map(String::as_str)
    }

    /// Insert lines immediately after the current position, so injected
    /// content is visited next, before the remaining original lines.
    pub fn push(&mut self, lines: Vec<String>) {
        self.inserted += lines.len();
        self.lines.splice(self.pos..self.pos, lines);
    }

    /// 1-based number of the current line in the original file, with
    /// every inserted line discounted.
    pub fn true_line(&self) -> usize {
        self.pos.saturating_sub(self.inserted)
    }
}
