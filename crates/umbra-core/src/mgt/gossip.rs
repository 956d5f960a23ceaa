//! Peerinfo gossip: keepalive-piggybacked advertisement of active peers.
//!
//! A peerinfo payload is a 32-bit record count followed by
//! `count x (PeerID(4) | NodeID(32) | PeerAddr(24))`. Emission walks the
//! slot table and stops before the minimum MTU is exceeded; reception
//! starts at a random record and walks the list circularly so that, over
//! many keepalives, every advertised node gets a chance to enter the
//! directory regardless of list order.

use super::PeerMgt;
use crate::nodedb::UpdateInfo;
use crate::packet::{PacketData, PEERID_SIZE};
use crate::peeraddr::{PeerAddr, PEERADDR_SIZE};
use crate::{MSG_MIN, PEERINFO_PER_MSG_MAX};
use umbra_crypto::{random, NodeId, NODEID_SIZE};

const RECORD_SIZE: usize = PEERID_SIZE + NODEID_SIZE + PEERADDR_SIZE;

impl PeerMgt {
    /// Build a peerinfo payload advertising active remote peers with
    /// externally reachable addresses.
    pub(crate) fn gen_peerinfo(&mut self) -> Vec<u8> {
        let mut payload = vec![0u8; 4];
        let mut count: u32 = 0;
        let candidates = self.map.used();
        for _ in 0..candidates {
            if payload.len() + RECORD_SIZE >= MSG_MIN {
                break;
            }
            let slot = self.map.next_id();
            if !self.is_active_remote(slot) || self.slots[slot].remote_addr.is_internal() {
                continue;
            }
            let Some(node_id) = self.node_id_of(slot) else {
                continue;
            };
            payload.extend_from_slice(&(slot as u32).to_be_bytes());
            payload.extend_from_slice(node_id.as_bytes());
            payload.extend_from_slice(&self.slots[slot].remote_addr.to_bytes());
            count += 1;
        }
        payload[..4].copy_from_slice(&count.to_be_bytes());
        payload
    }

    /// Merge a received peerinfo payload into the node directory.
    ///
    /// Unknown nodes are inserted with the advertised address; nodes we
    /// already hold a live session with are refreshed with the address the
    /// session confirmed, never the gossip-supplied one. The record count
    /// honored per message is capped, so a single peer cannot churn the
    /// whole directory.
    pub(crate) fn decode_peerinfo(&mut self, data: &PacketData, tnow: i64) -> bool {
        let payload = &data.payload;
        if payload.len() <= 4 {
            return false;
        }
        let declared =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if declared == 0 || 4 + declared * RECORD_SIZE > payload.len() {
            return false;
        }
        let count = declared.min(PEERINFO_PER_MSG_MAX);

        let mut r = random::rand_index(declared);
        for _ in 0..count {
            let pos = 4 + r * RECORD_SIZE;
            let mut node_bytes = [0u8; NODEID_SIZE];
            node_bytes.copy_from_slice(&payload[pos + PEERID_SIZE..pos + PEERID_SIZE + NODEID_SIZE]);
            let node_id = NodeId::from_bytes(node_bytes);
            let mut addr_bytes = [0u8; PEERADDR_SIZE];
            addr_bytes.copy_from_slice(
                &payload[pos + PEERID_SIZE + NODEID_SIZE..pos + RECORD_SIZE],
            );
            let addr = PeerAddr::from_bytes(&addr_bytes);

            match self.map.get(&node_id) {
                None => self.nodedb.update(
                    node_id,
                    Some(addr),
                    tnow,
                    UpdateInfo {
                        seen: true,
                        verified: false,
                        dialed: false,
                    },
                ),
                Some(local) if local > 0 => {
                    let confirmed = self.slots[local].remote_addr;
                    self.nodedb.update(
                        node_id,
                        Some(confirmed),
                        tnow,
                        UpdateInfo {
                            seen: true,
                            verified: true,
                            dialed: false,
                        },
                    );
                }
                // records describing ourselves are ignored
                Some(_) => {}
            }
            r = (r + 1) % declared;
        }
        true
    }
}
