//! Fragment reassembly for oversized userdata.
//!
//! Fragments of one message share a group key `(epoch, peer_id, base_seq)`
//! where `base_seq = seq - pos`; the session epoch keeps groups from
//! different sessions to the same slot index apart even if sequence
//! numbers collide. Buckets are a fixed pool: when every bucket is busy
//! the one touched longest ago is recycled, so a trickle of orphaned
//! fragments can never pin the pool.
//!
//! All fragments except the last must carry exactly [`MSG_MIN`] bytes; the
//! assembled message is capped at [`MSG_MAX`].

use crate::{FRAGBUF_COUNT, MSG_MAX, MSG_MIN};

/// Maximum fragments per group (4-bit count field).
pub const FRAG_COUNT_MAX: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupKey {
    epoch: i64,
    peer_id: u32,
    base_seq: u64,
}

#[derive(Debug)]
struct Bucket {
    key: GroupKey,
    buf: Vec<u8>,
    received: u16,
    count: u8,
    last_len: Option<usize>,
    touched: u64,
}

impl Bucket {
    fn complete(&self) -> bool {
        let want = (1u16 << self.count) - 1;
        self.received == want && self.last_len.is_some()
    }

    fn total_len(&self) -> usize {
        (self.count as usize - 1) * MSG_MIN + self.last_len.unwrap_or(0)
    }
}

/// Pool of fragment reassembly buckets.
#[derive(Debug)]
pub struct Dfrag {
    buckets: Vec<Option<Bucket>>,
    tick: u64,
}

impl Dfrag {
    /// Create a pool with [`FRAGBUF_COUNT`] buckets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: (0..FRAGBUF_COUNT).map(|_| None).collect(),
            tick: 0,
        }
    }

    /// Feed one fragment into the pool.
    ///
    /// Returns the bucket id once the group is complete; the caller then
    /// copies [`Dfrag::payload`] out and calls [`Dfrag::clear`]. Invalid
    /// fragments are dropped: `pos >= count`, zero or oversized counts,
    /// wrong per-fragment sizes, or a group that would exceed [`MSG_MAX`].
    pub fn assemble(
        &mut self,
        epoch: i64,
        peer_id: u32,
        base_seq: u64,
        payload: &[u8],
        pos: u8,
        count: u8,
    ) -> Option<usize> {
        if count == 0 || count > FRAG_COUNT_MAX || pos >= count {
            return None;
        }
        let is_last = pos == count - 1;
        if is_last {
            if payload.is_empty() || payload.len() > MSG_MIN {
                return None;
            }
        } else if payload.len() != MSG_MIN {
            return None;
        }
        if pos as usize * MSG_MIN + payload.len() > MSG_MAX {
            return None;
        }

        let key = GroupKey {
            epoch,
            peer_id,
            base_seq,
        };
        let idx = self.find_or_alloc(key, count)?;
        self.tick += 1;

        let bucket = self.buckets[idx].as_mut()?;
        bucket.touched = self.tick;
        bucket.received |= 1u16 << pos;
        let off = pos as usize * MSG_MIN;
        bucket.buf[off..off + payload.len()].copy_from_slice(payload);
        if is_last {
            bucket.last_len = Some(payload.len());
        }

        if bucket.complete() {
            Some(idx)
        } else {
            None
        }
    }

    fn find_or_alloc(&mut self, key: GroupKey, count: u8) -> Option<usize> {
        if let Some(idx) = self
            .buckets
            .iter()
            .position(|b| b.as_ref().is_some_and(|b| b.key == key))
        {
            // a group whose fragment count changed mid-flight is bogus
            if self.buckets[idx].as_ref()?.count != count {
                self.buckets[idx] = None;
                return None;
            }
            return Some(idx);
        }

        let idx = self
            .buckets
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| self.stalest());
        self.buckets[idx] = Some(Bucket {
            key,
            buf: vec![0u8; MSG_MAX],
            received: 0,
            count,
            last_len: None,
            touched: self.tick,
        });
        Some(idx)
    }

    fn stalest(&self) -> usize {
        let mut idx = 0;
        let mut oldest = u64::MAX;
        for (i, bucket) in self.buckets.iter().enumerate() {
            if let Some(b) = bucket {
                if b.touched < oldest {
                    oldest = b.touched;
                    idx = i;
                }
            }
        }
        idx
    }

    /// Assembled length of a completed bucket.
    #[must_use]
    pub fn length(&self, id: usize) -> usize {
        self.buckets
            .get(id)
            .and_then(Option::as_ref)
            .map_or(0, Bucket::total_len)
    }

    /// Assembled payload of a completed bucket.
    #[must_use]
    pub fn payload(&self, id: usize) -> Option<&[u8]> {
        let bucket = self.buckets.get(id)?.as_ref()?;
        if !bucket.complete() {
            return None;
        }
        Some(&bucket.buf[..bucket.total_len()])
    }

    /// Release a bucket.
    pub fn clear(&mut self, id: usize) {
        if let Some(slot) = self.buckets.get_mut(id) {
            *slot = None;
        }
    }

    /// Drop every bucket belonging to `peer_id` (slot reset).
    pub fn clear_peer(&mut self, peer_id: u32) {
        for slot in &mut self.buckets {
            if slot.as_ref().is_some_and(|b| b.key.peer_id == peer_id) {
                *slot = None;
            }
        }
    }

    /// Number of buckets currently in use.
    #[must_use]
    pub fn used(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }
}

impl Default for Dfrag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_assembly() {
        let mut d = Dfrag::new();
        let a = vec![0xaa; MSG_MIN];
        let b = vec![0xbb; MSG_MIN];
        let c = vec![0xcc; 500];

        assert_eq!(d.assemble(1, 2, 100, &a, 0, 3), None);
        assert_eq!(d.assemble(1, 2, 100, &b, 1, 3), None);
        let id = d.assemble(1, 2, 100, &c, 2, 3).unwrap();

        assert_eq!(d.length(id), 2 * MSG_MIN + 500);
        let msg = d.payload(id).unwrap();
        assert_eq!(&msg[..MSG_MIN], &a[..]);
        assert_eq!(&msg[2 * MSG_MIN..], &c[..]);
        d.clear(id);
        assert_eq!(d.used(), 0);
    }

    #[test]
    fn test_out_of_order_assembly() {
        let mut d = Dfrag::new();
        let a = vec![1u8; MSG_MIN];
        let b = vec![2u8; 10];
        assert_eq!(d.assemble(7, 3, 50, &b, 1, 2), None);
        let id = d.assemble(7, 3, 50, &a, 0, 2).unwrap();
        assert_eq!(d.length(id), MSG_MIN + 10);
    }

    #[test]
    fn test_single_fragment_group() {
        let mut d = Dfrag::new();
        let id = d.assemble(1, 1, 9, b"tiny", 0, 1).unwrap();
        assert_eq!(d.payload(id).unwrap(), b"tiny");
    }

    #[test]
    fn test_invalid_pos_count() {
        let mut d = Dfrag::new();
        assert_eq!(d.assemble(1, 1, 0, b"x", 1, 1), None);
        assert_eq!(d.assemble(1, 1, 0, b"x", 0, 0), None);
        assert_eq!(d.assemble(1, 1, 0, b"x", 5, 3), None);
        assert_eq!(d.assemble(1, 1, 0, &vec![0u8; MSG_MIN], 0, 16), None);
        assert_eq!(d.used(), 0);
    }

    #[test]
    fn test_wrong_middle_size_dropped() {
        let mut d = Dfrag::new();
        assert_eq!(d.assemble(1, 1, 0, b"short", 0, 3), None);
        assert_eq!(d.used(), 0);
    }

    #[test]
    fn test_oversize_group_rejected() {
        let mut d = Dfrag::new();
        // 9 full fragments would exceed MSG_MAX = 8 * MSG_MIN
        let full = vec![0u8; MSG_MIN];
        for pos in 0..8u8 {
            d.assemble(1, 1, 0, &full, pos, 9);
        }
        assert_eq!(d.assemble(1, 1, 0, &full, 8, 9), None);
    }

    #[test]
    fn test_epoch_separation() {
        let mut d = Dfrag::new();
        let full = vec![5u8; MSG_MIN];
        assert_eq!(d.assemble(1, 1, 100, &full, 0, 2), None);
        // same peer and base_seq, different epoch: a distinct group
        assert_eq!(d.assemble(2, 1, 100, b"end", 1, 2), None);
        assert_eq!(d.used(), 2);
    }

    #[test]
    fn test_clear_peer() {
        let mut d = Dfrag::new();
        let full = vec![5u8; MSG_MIN];
        d.assemble(1, 1, 100, &full, 0, 2);
        d.assemble(1, 2, 100, &full, 0, 2);
        d.clear_peer(1);
        assert_eq!(d.used(), 1);
    }

    #[test]
    fn test_pool_recycles_stalest() {
        let mut d = Dfrag::new();
        let full = vec![9u8; MSG_MIN];
        for i in 0..FRAGBUF_COUNT as u64 {
            d.assemble(1, 1, i * 100, &full, 0, 2);
        }
        assert_eq!(d.used(), FRAGBUF_COUNT);
        // one more group forces recycling of the first
        d.assemble(1, 1, 999_999, &full, 0, 2);
        assert_eq!(d.used(), FRAGBUF_COUNT);
        // the recycled group restarts from scratch
        assert_eq!(d.assemble(1, 1, 0, b"end", 1, 2), None);
    }
}
