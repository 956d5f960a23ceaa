//! Directory of known nodes used for opportunistic dialing.
//!
//! A fixed-capacity store of `(NodeId, PeerAddr)` candidates learned from
//! peerinfo gossip and from completed sessions. When full, the entry least
//! recently seen is evicted. The rotating candidate cursor feeds the dial
//! loop; it skips stale entries and entries dialed too recently, so a dead
//! address cannot monopolize the dial loop.

use crate::peeraddr::PeerAddr;
use umbra_crypto::NodeId;

/// Seconds before the same candidate may be dialed again.
pub const REDIAL_INTERVAL: i64 = 30;

/// Attribute changes applied by [`NodeDb::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateInfo {
    /// The node was observed just now (refreshes the age used for eviction
    /// and candidate filtering).
    pub seen: bool,
    /// The address comes from a verified source (a live session or the
    /// node itself), not from third-party gossip.
    pub verified: bool,
    /// A dial attempt was just made.
    pub dialed: bool,
}

#[derive(Debug)]
struct Entry {
    node_id: NodeId,
    addr: PeerAddr,
    last_seen: i64,
    last_dial: i64,
    verified: bool,
}

/// Fixed-capacity LRU directory of dial candidates.
#[derive(Debug)]
pub struct NodeDb {
    entries: Vec<Option<Entry>>,
    cursor: usize,
    max_age: i64,
}

impl NodeDb {
    /// Create a directory with room for `capacity` nodes.
    #[must_use]
    pub fn new(capacity: usize, max_age: i64) -> Self {
        Self {
            entries: (0..capacity).map(|_| None).collect(),
            cursor: 0,
            max_age,
        }
    }

    /// Number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Total capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Adjust the staleness cap used by [`NodeDb::next_candidate`].
    pub fn set_max_age(&mut self, secs: i64) {
        self.max_age = secs;
    }

    fn position(&self, node_id: &NodeId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.node_id == *node_id))
    }

    /// Insert or refresh a node.
    ///
    /// A new entry is only created when an address is supplied. An existing
    /// entry's address is replaced by a verified address unconditionally,
    /// but by an unverified (gossip) address only if the entry was never
    /// verified; misdirection through gossip cannot displace an address a
    /// live session confirmed.
    pub fn update(&mut self, node_id: NodeId, addr: Option<PeerAddr>, tnow: i64, info: UpdateInfo) {
        let idx = match self.position(&node_id) {
            Some(idx) => idx,
            None => {
                let Some(addr) = addr else { return };
                let idx = self.free_or_evict();
                self.entries[idx] = Some(Entry {
                    node_id,
                    addr,
                    last_seen: tnow,
                    last_dial: 0,
                    verified: info.verified,
                });
                idx
            }
        };
        let Some(entry) = self.entries[idx].as_mut() else {
            return;
        };
        if let Some(addr) = addr {
            if info.verified || !entry.verified {
                entry.addr = addr;
            }
        }
        entry.verified |= info.verified;
        if info.seen {
            entry.last_seen = tnow;
        }
        if info.dialed {
            entry.last_dial = tnow;
        }
    }

    fn free_or_evict(&mut self) -> usize {
        if let Some(idx) = self.entries.iter().position(Option::is_none) {
            return idx;
        }
        // evict the entry seen longest ago
        let mut oldest = 0;
        let mut oldest_seen = i64::MAX;
        for (idx, entry) in self.entries.iter().enumerate() {
            if let Some(e) = entry {
                if e.last_seen < oldest_seen {
                    oldest_seen = e.last_seen;
                    oldest = idx;
                }
            }
        }
        self.entries[oldest] = None;
        oldest
    }

    /// Advance the rotating cursor to the next dialable candidate.
    ///
    /// Skips entries older than the staleness cap and entries dialed within
    /// the last [`REDIAL_INTERVAL`] seconds. Returns the entry index.
    pub fn next_candidate(&mut self, tnow: i64, max_age: i64) -> Option<usize> {
        let len = self.entries.len();
        let cap = max_age.min(self.max_age);
        for _ in 0..len {
            self.cursor = (self.cursor + 1) % len;
            if let Some(entry) = &self.entries[self.cursor] {
                let fresh = tnow - entry.last_seen <= cap;
                let rested = tnow - entry.last_dial >= REDIAL_INTERVAL || entry.last_dial == 0;
                if fresh && rested && !entry.addr.is_internal() {
                    return Some(self.cursor);
                }
            }
        }
        None
    }

    /// Node ID stored at `idx`.
    #[must_use]
    pub fn node_id(&self, idx: usize) -> Option<&NodeId> {
        self.entries.get(idx)?.as_ref().map(|e| &e.node_id)
    }

    /// Address stored at `idx`.
    #[must_use]
    pub fn address(&self, idx: usize) -> Option<PeerAddr> {
        self.entries.get(idx)?.as_ref().map(|e| e.addr)
    }
}
