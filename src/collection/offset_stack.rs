//! Raw offsets of logical page boundaries.

/// One raw-server offset per logical page produced so far.
///
/// Filtering makes logical pages cover irregular raw ranges, so going back a
/// page needs the exact raw offset it started at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetStack {
    offsets: Vec<usize>,
}

impl OffsetStack {
    pub fn push(&mut self, offset: usize) {
        self.offsets.push(offset);
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.offsets.pop()
    }

    /// Number of recorded page boundaries.
    pub fn depth(&self) -> usize {
        self.offsets.len()
    }

    /// Raw offset the current page started at.
    pub fn current(&self) -> Option<usize> {
        self.offsets.last().copied()
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.offsets
    }
}
