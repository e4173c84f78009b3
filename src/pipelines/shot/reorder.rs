// SPDX-License-Identifier: GPL-3.0-only

//! Index-keyed reorder buffer
//!
//! Reordering depth is bounded by the number of frames in flight, so a small
//! ordered map with a "next expected" cursor is all that is needed.

use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_expected: u32,
    pending: BTreeMap<u32, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next_expected: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Items held back waiting for an earlier index
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Insert an item and return every item now releasable, in index order
    ///
    /// Indices already released or already buffered are dropped.
    pub fn insert(&mut self, index: u32, item: T) -> Vec<(u32, T)> {
        if index < self.next_expected || self.pending.contains_key(&index) {
            warn!(index, next = self.next_expected, "Duplicate frame ignored");
            return Vec::new();
        }
        self.pending.insert(index, item);

        let mut released = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_expected) {
            released.push((self.next_expected, item));
            self.next_expected += 1;
        }
        released
    }

    /// Drop everything still buffered, returning how many items were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_passes_through() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.insert(0, 'a'), vec![(0, 'a')]);
        assert_eq!(buffer.insert(1, 'b'), vec![(1, 'b')]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_out_of_order_held_until_gap_filled() {
        let mut buffer = ReorderBuffer::new();
        assert!(buffer.insert(2, 'c').is_empty());
        assert!(buffer.insert(1, 'b').is_empty());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.insert(0, 'a'), vec![(0, 'a'), (1, 'b'), (2, 'c')]);
        assert_eq!(buffer.next_expected(), 3);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut buffer = ReorderBuffer::new();
        buffer.insert(0, 'a');
        assert!(buffer.insert(0, 'x').is_empty());
        buffer.insert(2, 'c');
        assert!(buffer.insert(2, 'y').is_empty());
        assert_eq!(buffer.clear(), 1);
    }
}
