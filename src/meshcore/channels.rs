//! Channel name <-> index allocation.
//!
//! Index 0 means "no named channel". Named channels are handed indices 1..=7 in the
//! order they are first used and keep them for the lifetime of the session.
use std::collections::HashMap;

use super::errors::{MeshCoreError, Result};

/// Highest channel slot addressable on the companion radio.
pub const MAX_CHANNEL_INDEX: u8 = 7;
/// Number of slots available to named channels (slot 0 is reserved).
pub const MAX_NAMED_CHANNELS: usize = MAX_CHANNEL_INDEX as usize;

#[derive(Debug, Clone)]
pub struct ChannelTable {
    by_name: HashMap<String, u8>,
    by_index: [Option<String>; MAX_CHANNEL_INDEX as usize + 1],
    next_free: u8,
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTable {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_index: Default::default(),
            next_free: 1,
        }
    }

    /// Resolve a channel name to its index, allocating the next slot on first use.
    ///
    /// `None` always maps to 0. Fails without touching the table once all seven
    /// named slots are taken.
    pub fn get_or_assign(&mut self, name: Option<&str>) -> Result<u8> {
        let Some(name) = name else {
            return Ok(0);
        };
        if let Some(&idx) = self.by_name.get(name) {
            return Ok(idx);
        }
        if self.next_free > MAX_CHANNEL_INDEX {
            return Err(MeshCoreError::ChannelLimitExceeded {
                name: name.to_string(),
                limit: MAX_NAMED_CHANNELS,
            });
        }
        let idx = self.next_free;
        self.next_free += 1;
        self.by_name.insert(name.to_string(), idx);
        self.by_index[idx as usize] = Some(name.to_string());
        log::debug!("Assigned channel '{}' to index {}", name, idx);
        Ok(idx)
    }

    /// Reverse lookup. `None` for index 0, out-of-range indices and free slots.
    pub fn get_name(&self, index: u8) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.by_index.get(index as usize)?.as_deref()
    }

    /// Forward lookup without allocating.
    pub fn get_index(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
