//! Per-session output record.

use std::collections::VecDeque;

/// Append-only record of a session's output.
///
/// Unbounded by default. With a limit, the oldest bytes are dropped once the
/// record grows past it.
#[derive(Debug, Default)]
pub struct Scrollback {
    buffer: VecDeque<u8>,
    limit: Option<usize>,
}

impl Scrollback {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            buffer: VecDeque::new(),
            limit,
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend(data);
        if let Some(limit) = self.limit {
            let excess = self.buffer.len().saturating_sub(limit);
            if excess > 0 {
                self.buffer.drain(..excess);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        let (front, back) = self.buffer.as_slices();
        let mut out = Vec::with_capacity(self.buffer.len());
        out.extend_from_slice(front);
        out.extend_from_slice(back);
        out
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
