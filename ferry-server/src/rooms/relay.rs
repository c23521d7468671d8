//! Relay buffer: chunks held for the receiver to pull by index
//!
//! A room's buffer holds at most `limit` payload bytes. Chunks the receiver
//! reports holding stay until space is needed, so a restarted receiver can
//! still pull them; when an upload would pass the limit, held chunks are
//! evicted lowest index first, and only then is the upload refused.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

/// One buffered chunk
#[derive(Debug, Clone)]
pub struct RelayChunkEntry {
    pub payload: Arc<Vec<u8>>,
    pub total_chunks: u64,
}

/// The upload does not fit even after evicting held chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("relay buffer holds {held} of {limit} bytes")]
pub struct BufferFull {
    pub held: usize,
    pub limit: usize,
}

/// Chunks of one room keyed by `(transfer_id, chunk_index)`
///
/// Ordered so the indices of a transfer come out ascending.
#[derive(Debug)]
pub struct RelayBuffer {
    entries: BTreeMap<(String, u64), RelayChunkEntry>,
    bytes: usize,
    limit: usize,
    /// Per transfer, the receiver holds every chunk below this index
    held_below: HashMap<String, u64>,
}

impl RelayBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            bytes: 0,
            limit,
            held_below: HashMap::new(),
        }
    }

    /// Store a chunk, replacing any earlier copy of the same index
    ///
    /// Evicts chunks the receiver already holds if the new payload would not
    /// fit otherwise.
    pub fn store(
        &mut self,
        transfer_id: &str,
        index: u64,
        total_chunks: u64,
        payload: Vec<u8>,
    ) -> Result<(), BufferFull> {
        let key = (transfer_id.to_string(), index);
        let replaced = self.entries.get(&key).map_or(0, |old| old.payload.len());
        let needed = (self.bytes - replaced + payload.len()).saturating_sub(self.limit);
        if needed > 0 && self.evict_held(needed) < needed {
            return Err(BufferFull {
                held: self.bytes,
                limit: self.limit,
            });
        }

        self.bytes += payload.len();
        let entry = RelayChunkEntry {
            payload: Arc::new(payload),
            total_chunks,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.bytes -= old.payload.len();
        }
        Ok(())
    }

    /// Record that the receiver holds every chunk of a transfer below `below`
    pub fn mark_held(&mut self, transfer_id: &str, below: u64) {
        let mark = self.held_below.entry(transfer_id.to_string()).or_default();
        *mark = (*mark).max(below);
    }

    /// Forget what a receiver reported holding, e.g. after it restarted
    pub fn forget_held(&mut self, transfer_id: &str) {
        self.held_below.remove(transfer_id);
    }

    /// Drop held chunks, lowest index first, until `wanted` bytes are freed
    fn evict_held(&mut self, wanted: usize) -> usize {
        let held: Vec<(String, u64)> = self
            .entries
            .keys()
            .filter(|(id, index)| self.held_below.get(id).is_some_and(|&below| *index < below))
            .cloned()
            .collect();

        let mut freed = 0;
        for key in held {
            if freed >= wanted {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                freed += entry.payload.len();
                self.bytes -= entry.payload.len();
            }
        }
        freed
    }

    pub fn get(&self, transfer_id: &str, index: u64) -> Option<&RelayChunkEntry> {
        self.entries.get(&(transfer_id.to_string(), index))
    }

    /// Buffered indices of a transfer, ascending
    pub fn indices(&self, transfer_id: &str) -> Vec<u64> {
        let start = (transfer_id.to_string(), 0);
        let end = (transfer_id.to_string(), u64::MAX);
        self.entries
            .range(start..=end)
            .map(|((_, index), _)| *index)
            .collect()
    }

    /// Drop every chunk of one transfer, returning how many were removed
    pub fn drop_transfer(&mut self, transfer_id: &str) -> usize {
        let keys: Vec<(String, u64)> = self
            .entries
            .range((transfer_id.to_string(), 0)..=(transfer_id.to_string(), u64::MAX))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(entry) = self.entries.remove(key) {
                self.bytes -= entry.payload.len();
            }
        }
        self.held_below.remove(transfer_id);
        keys.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.held_below.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total payload bytes held
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}
