//! The send/receive staging API.
//!
//! Staging never blocks and never emits; datagrams leave only through the
//! scheduler. Each staging class is a depth-one queue, and staging a new
//! message of a class overwrites whatever was pending in it.

use super::{PeerMgt, PendingMsg, PendingRr};
use crate::packet::PayloadType;
use crate::{MSG_MAX, PING_SIZE};
use umbra_crypto::{random, NodeId};

/// A received userdata message surfaced to the host.
pub struct RecvMsg<'a> {
    /// Message bytes; valid until the next manager call.
    pub data: &'a [u8],
    /// Sender identity, when the slot still resolves.
    pub from_node_id: Option<NodeId>,
    /// Sender slot index.
    pub from_peer_id: u32,
}

impl PeerMgt {
    /// Stage a userdata message toward a peer named by node ID, slot
    /// index, or both (which must agree).
    ///
    /// A message addressed to the local node is delivered through the
    /// in-memory loopback shortcut when enabled. Returns `false` for
    /// empty or oversized messages and unresolvable recipients.
    pub fn send_userdata(
        &mut self,
        msg: &[u8],
        to_node_id: Option<&NodeId>,
        to_peer_id: Option<u32>,
    ) -> bool {
        if msg.is_empty() || msg.len() > MSG_MAX {
            return false;
        }
        let Some(peer_id) = self.resolve(to_node_id, to_peer_id) else {
            return false;
        };
        if peer_id == 0 {
            if !self.loopback {
                return false;
            }
            self.msgbuf[..msg.len()].copy_from_slice(msg);
            self.msgsize = msg.len();
            self.msgpeerid = 0;
            return true;
        }
        self.outmsg = Some(PendingMsg {
            data: msg.to_vec(),
            peer_id,
            broadcast: false,
            broadcast_count: 0,
        });
        true
    }

    /// Stage a userdata message for every connected peer.
    ///
    /// Delivery is best-effort: the scheduler hands the message to one
    /// recipient per call and stops after as many calls as there are
    /// occupied slots.
    pub fn send_broadcast_userdata(&mut self, msg: &[u8]) -> bool {
        if msg.is_empty() || msg.len() > MSG_MAX {
            return false;
        }
        self.outmsg = Some(PendingMsg {
            data: msg.to_vec(),
            peer_id: 0,
            broadcast: true,
            broadcast_count: 0,
        });
        true
    }

    /// Stage a ping (64 random bytes) toward an active remote peer.
    pub fn send_ping(&mut self, to_node_id: Option<&NodeId>, to_peer_id: Option<u32>) -> bool {
        let Some(peer_id) = self.resolve(to_node_id, to_peer_id) else {
            return false;
        };
        if peer_id == 0 {
            return false;
        }
        let mut payload = vec![0u8; PING_SIZE];
        random::rand_bytes(&mut payload);
        self.rrmsg = Some(PendingRr {
            data: payload,
            peer_id,
            pl_type: PayloadType::Ping,
        });
        true
    }

    /// Hand the pending received userdata message to the host, if any.
    pub fn recv_userdata(&mut self) -> Option<RecvMsg<'_>> {
        if self.msgsize == 0 {
            return None;
        }
        let len = self.msgsize;
        self.msgsize = 0;
        let from_peer_id = self.msgpeerid;
        let from_node_id = self.node_id_of(from_peer_id as usize);
        Some(RecvMsg {
            data: &self.msgbuf[..len],
            from_node_id,
            from_peer_id,
        })
    }
}
