//! Dense fixed-capacity slot allocator keyed by node ID.
//!
//! PeerIDs are wire-visible small integers, so sessions live in a dense
//! array of slots; this map is the sole `NodeId -> slot` index. The
//! rotating [`PeerMap::next_id`] cursor gives broadcast and gossip a
//! fair-ish iteration order that eventually visits every occupied slot.

use std::collections::HashMap;
use umbra_crypto::NodeId;

/// `NodeId -> slot` allocator with reverse lookup.
#[derive(Debug)]
pub struct PeerMap {
    slots: Vec<Option<NodeId>>,
    index: HashMap<NodeId, usize>,
    cursor: usize,
}

impl PeerMap {
    /// Create a map with `capacity` slots, all free.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            index: HashMap::with_capacity(capacity),
            cursor: 0,
        }
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn used(&self) -> usize {
        self.index.len()
    }

    /// Whether `slot` is within range and occupied.
    #[must_use]
    pub fn is_valid(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(Option::is_some)
    }

    /// Allocate the lowest free slot for `node_id`.
    ///
    /// Returns `None` when the map is full or the key is already present.
    pub fn insert(&mut self, node_id: NodeId) -> Option<usize> {
        if self.index.contains_key(&node_id) {
            return None;
        }
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(node_id);
        self.index.insert(node_id, slot);
        Some(slot)
    }

    /// Free the slot owned by `node_id`, returning its index.
    pub fn remove(&mut self, node_id: &NodeId) -> Option<usize> {
        let slot = self.index.remove(node_id)?;
        self.slots[slot] = None;
        Some(slot)
    }

    /// Slot owned by `node_id`, if any.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<usize> {
        self.index.get(node_id).copied()
    }

    /// Node ID occupying `slot`, if any.
    #[must_use]
    pub fn node_id(&self, slot: usize) -> Option<&NodeId> {
        self.slots.get(slot)?.as_ref()
    }

    /// Advance the rotating cursor to the next occupied slot and return it.
    ///
    /// With at least one occupied slot this always terminates; callers
    /// bound their sweeps by [`PeerMap::used`]. Returns 0 when empty.
    pub fn next_id(&mut self) -> usize {
        if self.index.is_empty() {
            return 0;
        }
        let len = self.slots.len();
        for _ in 0..len {
            self.cursor = (self.cursor + 1) % len;
            if self.slots[self.cursor].is_some() {
                return self.cursor;
            }
        }
        0
    }
}
