//! Inbound dispatch: decryption, replay checking, type switch, fragment
//! glue, relay decapsulation and the authentication binding.
//!
//! Decoding is recursive with an explicit depth parameter capped at
//! [`DECODE_RECURSION_MAX_DEPTH`]: a `RELAY_OUT` payload re-enters the
//! dispatcher once, with a synthetic indirect source address derived from
//! the relay session. The cap is a security property - it prevents
//! relay-cycle amplification - and each recursion level decodes out of a
//! fresh buffer.

use super::{PeerMgt, SlotState};
use crate::nodedb::UpdateInfo;
use crate::packet::{self, PacketData, PayloadType, HMAC_SIZE, PEERID_SIZE};
use crate::peeraddr::PeerAddr;
use crate::{DECODE_RECURSION_MAX_DEPTH, FLAG_RELAY, FLAG_USERDATA, MSG_MAX, PING_SIZE};
use tracing::trace;

impl PeerMgt {
    /// Process one inbound datagram.
    ///
    /// Returns `true` when the packet was accepted and advanced some state;
    /// every failure mode - bad HMAC, replay, unknown type, inactive slot,
    /// recursion overflow - drops the packet silently.
    pub fn handle_incoming(&mut self, packet: &[u8], source: PeerAddr) -> bool {
        let tnow = self.clock.now();
        self.decode_recursive(packet, source, tnow, 0)
    }

    fn decode_recursive(
        &mut self,
        packet: &[u8],
        source: PeerAddr,
        tnow: i64,
        depth: usize,
    ) -> bool {
        if depth >= DECODE_RECURSION_MAX_DEPTH {
            return false;
        }
        if packet.len() <= PEERID_SIZE + HMAC_SIZE {
            return false;
        }
        let Some(peer_id) = packet::peer_id(packet) else {
            return false;
        };
        let slot = peer_id as usize;
        if !self.is_active(slot) {
            return false;
        }

        if peer_id == 0 {
            // anonymous packet: group context, no replay window
            let Ok(data) = packet::decode(packet, &self.slots[0].crypto_ctx, None) else {
                return false;
            };
            return match data.pl_type {
                PayloadType::Auth => self.decode_auth(&data, source, tnow),
                _ => false,
            };
        }

        self.msgsize = 0;
        let s = &mut self.slots[slot];
        let Ok(data) = packet::decode(packet, &s.crypto_ctx, Some(&mut s.seq_state)) else {
            trace!(slot, "inbound packet dropped by codec");
            return false;
        };
        if data.payload.is_empty() || data.payload.len() >= MSG_MAX {
            return false;
        }

        let accepted = match data.pl_type {
            PayloadType::Userdata => {
                if self.flag(FLAG_USERDATA) {
                    self.msgbuf[..data.payload.len()].copy_from_slice(&data.payload);
                    self.msgsize = data.payload.len();
                    self.msgpeerid = peer_id;
                    true
                } else {
                    false
                }
            }
            PayloadType::UserdataFragment => {
                self.flag(FLAG_USERDATA) && self.decode_fragment(peer_id, &data)
            }
            PayloadType::Peerinfo => self.decode_peerinfo(&data, tnow),
            PayloadType::Ping => self.decode_ping(peer_id, &data),
            // RTT accounting is not implemented; pongs are dropped without
            // refreshing the session
            PayloadType::Pong => false,
            PayloadType::RelayIn => self.flag(FLAG_RELAY) && self.decode_relay_in(peer_id, &data),
            PayloadType::RelayOut => self.decode_relay_out(peer_id, &data, tnow, depth),
            PayloadType::Auth => false,
        };

        if accepted {
            let s = &mut self.slots[slot];
            s.last_recv = tnow;
            s.remote_addr = source;
        }
        accepted
    }

    /// Feed a fragment to the defragmenter; on completion the assembled
    /// message is staged exactly like plain userdata.
    fn decode_fragment(&mut self, peer_id: u32, data: &PacketData) -> bool {
        let count = data.options >> 4;
        let pos = data.options & 0x0f;
        let base_seq = data.seq.wrapping_sub(u64::from(pos));
        let epoch = self.slots[peer_id as usize].conn_time;

        let Some(id) = self
            .dfrag
            .assemble(epoch, peer_id, base_seq, &data.payload, pos, count)
        else {
            return false;
        };
        let len = self.dfrag.length(id);
        if len == 0 || len > MSG_MAX {
            self.dfrag.clear(id);
            return false;
        }
        let Some(assembled) = self.dfrag.payload(id) else {
            self.dfrag.clear(id);
            return false;
        };
        self.msgbuf[..len].copy_from_slice(assembled);
        self.dfrag.clear(id);
        self.msgsize = len;
        self.msgpeerid = peer_id;
        true
    }

    /// Stage a pong reply carrying the ping payload back.
    fn decode_ping(&mut self, peer_id: u32, data: &PacketData) -> bool {
        if data.payload.len() != PING_SIZE {
            return false;
        }
        self.rrmsg = Some(super::PendingRr {
            data: data.payload.clone(),
            peer_id,
            pl_type: PayloadType::Pong,
        });
        true
    }

    /// Relay service: re-queue the opaque inner payload toward the target
    /// peer as a `RELAY_OUT` carrying the origin's slot index. The inner
    /// packet is never decrypted here.
    fn decode_relay_in(&mut self, origin_peer_id: u32, data: &PacketData) -> bool {
        let len = data.payload.len();
        if len <= PEERID_SIZE || len >= MSG_MAX - PEERID_SIZE {
            return false;
        }
        let target = u32::from_be_bytes([
            data.payload[0],
            data.payload[1],
            data.payload[2],
            data.payload[3],
        ]);
        if !self.is_active_remote(target as usize) {
            return false;
        }
        let mut msg = Vec::with_capacity(len);
        msg.extend_from_slice(&origin_peer_id.to_be_bytes());
        msg.extend_from_slice(&data.payload[PEERID_SIZE..]);
        self.rrmsg = Some(super::PendingRr {
            data: msg,
            peer_id: target,
            pl_type: PayloadType::RelayOut,
        });
        true
    }

    /// Decapsulate a relayed packet and re-enter the dispatcher with a
    /// synthetic indirect source address.
    fn decode_relay_out(
        &mut self,
        relay_peer_id: u32,
        data: &PacketData,
        tnow: i64,
        depth: usize,
    ) -> bool {
        if data.payload.len() <= PEERID_SIZE {
            return false;
        }
        let origin = u32::from_be_bytes([
            data.payload[0],
            data.payload[1],
            data.payload[2],
            data.payload[3],
        ]);
        let conn_time = self.slots[relay_peer_id as usize].conn_time;
        let indirect = PeerAddr::indirect(relay_peer_id, conn_time, origin);
        // fresh buffer per recursion level; depth is capped at 2
        let inner = data.payload[PEERID_SIZE..].to_vec();
        self.decode_recursive(&inner, indirect, tnow, depth + 1)
    }

    /// Drive the handshake driver and bind its authed/completed hooks to
    /// the slot table.
    fn decode_auth(&mut self, data: &PacketData, source: PeerAddr, tnow: i64) -> bool {
        if !self.authmgt.decode_msg(&data.payload, source, tnow) {
            return false;
        }

        if let Some(node_id) = self.authmgt.authed_node_id() {
            if self.map.get(&node_id).is_some() {
                // never replace a live session for the same identity
                self.authmgt.reject_authed_peer();
            } else if let Some(peer_id) = self.new_peer(node_id, source, tnow) {
                let seq_base = self.slots[peer_id as usize].seq_state.base();
                self.authmgt
                    .accept_authed_peer(peer_id, seq_base, self.local_flags);
            } else {
                self.authmgt.reject_authed_peer();
            }
        }

        if let Some(node_id) = self.authmgt.completed_node_id() {
            if let Some(slot) = self.map.get(&node_id) {
                let accepted_here = self.authmgt.completed_local_id() == Some(slot as u32);
                if slot > 0 && self.slots[slot].state == SlotState::Authed && accepted_here {
                    if let (Some((remote_id, addr)), Some(ctx), Some((remote_seq, remote_flags))) = (
                        self.authmgt.completed_address(),
                        self.authmgt.completed_session_keys(),
                        self.authmgt.completed_connection_params(),
                    ) {
                        let s = &mut self.slots[slot];
                        s.remote_id = remote_id;
                        s.remote_addr = addr;
                        s.crypto_ctx = ctx;
                        s.remote_seq = remote_seq;
                        s.remote_flags = remote_flags;
                        s.state = SlotState::Complete;
                        s.last_recv = tnow;
                        self.nodedb.update(
                            node_id,
                            Some(addr),
                            tnow,
                            UpdateInfo {
                                seen: true,
                                verified: true,
                                dialed: false,
                            },
                        );
                        tracing::info!(slot, node_id = %node_id, "session established");
                    }
                }
            }
            self.authmgt.finish_completed_peer(tnow);
        }
        true
    }
}
