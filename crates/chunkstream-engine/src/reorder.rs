//! Reorder buffer for out-of-order completions.
//!
//! Items arrive tagged with a sequence number in any order and leave strictly
//! in ascending sequence order, starting at zero.

use std::collections::BTreeMap;

use chunkstream_common::{Error, Result};

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    cursor: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            cursor: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Sequence number the consumer expects next.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Hold a completed item until every earlier sequence has been emitted.
    ///
    /// Rejects sequences that were already emitted or are already buffered.
    pub fn insert(&mut self, seq: u64, item: T) -> Result<()> {
        if seq < self.cursor || self.pending.contains_key(&seq) {
            return Err(Error::internal(format!(
                "duplicate completion for sequence {seq}"
            )));
        }
        self.pending.insert(seq, item);
        Ok(())
    }

    /// Take the item at the cursor, if it has arrived, and advance.
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        let item = self.pending.remove(&self.cursor)?;
        let seq = self.cursor;
        self.cursor += 1;
        Some((seq, item))
    }

    /// Completed items waiting on an earlier sequence.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
