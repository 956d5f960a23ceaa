//! The outbound scheduler.
//!
//! One datagram per call, in fixed priority order:
//!
//! 1. staged userdata (unicast or one broadcast recipient)
//! 2. the in-progress fragment group
//! 3. the request/response queue (ping, pong, relay-out)
//! 4. keepalive sweep (which also deletes timed-out sessions)
//! 5. handshake traffic
//! 6. a dial attempt (produces no datagram itself)
//!
//! After steps 1-4 produce a datagram whose target decodes as an indirect
//! address, the packet is wrapped in a `RELAY_IN` addressed to the relay
//! peer - once; encapsulation never recurses.

use super::{FragOut, PeerMgt, SlotState};
use crate::nodedb::UpdateInfo;
use crate::packet::{self, PayloadType, PEERID_SIZE};
use crate::peeraddr::PeerAddr;
use crate::{
    KEEPALIVE_INTERVAL, MSG_MAX, MSG_MIN, NEWCONNECT_INTERVAL, NEWCONNECT_MAX_AGE, RECV_TIMEOUT,
};
use tracing::trace;
use umbra_crypto::random;

impl PeerMgt {
    /// Produce the next outbound datagram, if any is due.
    ///
    /// Writes the encoded packet into `buf` and returns its length and
    /// target address. `buf` should hold at least [`crate::DGRAM_MAX`]
    /// bytes. At most one datagram is produced per call; the caller must
    /// send it before calling again.
    pub fn take_next_outgoing(&mut self, buf: &mut [u8]) -> Option<(usize, PeerAddr)> {
        let tnow = self.clock.now();
        let (len, target) = self.next_packet_gen(buf, tnow)?;
        if !target.is_internal() {
            return Some((len, target));
        }
        self.encapsulate_relay(buf, len, target, tnow)
    }

    /// Wrap an already-encoded datagram in a `RELAY_IN` toward the relay
    /// peer named by the indirect target. Applied at most once.
    fn encapsulate_relay(
        &mut self,
        buf: &mut [u8],
        len: usize,
        target: PeerAddr,
        tnow: i64,
    ) -> Option<(usize, PeerAddr)> {
        let (relay_id, relay_ct, inner_id) = target.get_indirect()?;
        if PEERID_SIZE + len >= MSG_MAX {
            return None;
        }
        if !self.is_active_remote_ct(relay_id as usize, relay_ct) {
            trace!(relay_id, "relay session gone; dropping wrapped packet");
            return None;
        }
        let mut inner = Vec::with_capacity(PEERID_SIZE + len);
        inner.extend_from_slice(&inner_id.to_be_bytes());
        inner.extend_from_slice(&buf[..len]);

        let s = &mut self.slots[relay_id as usize];
        s.remote_seq += 1;
        let wrapped = packet::encode(
            buf,
            s.remote_id,
            s.remote_seq,
            PayloadType::RelayIn,
            0,
            &inner,
            &s.crypto_ctx,
        )
        .ok()?;
        s.last_send = tnow;
        let out = s.remote_addr;
        // a relay reachable only through another relay would recurse; drop
        if out.is_internal() {
            return None;
        }
        Some((wrapped, out))
    }

    fn next_packet_gen(&mut self, buf: &mut [u8], tnow: i64) -> Option<(usize, PeerAddr)> {
        // 1. staged userdata, unless a fragment group is in progress
        if self.frag_out.is_none() {
            if let Some(mut pending) = self.outmsg.take() {
                let mut peer_id = pending.peer_id;
                let mut exhausted = true;
                if pending.broadcast {
                    // consume one recipient per call; the count tracks
                    // scheduler picks, not successful transmissions
                    let used = self.map.used();
                    loop {
                        peer_id = self.map.next_id() as u32;
                        pending.broadcast_count += 1;
                        if self.is_active_remote(peer_id as usize)
                            || pending.broadcast_count >= used
                        {
                            break;
                        }
                    }
                    exhausted = pending.broadcast_count >= used;
                }

                let mut result = None;
                if self.is_active_remote(peer_id as usize)
                    && self.remote_flag(peer_id, crate::FLAG_USERDATA)
                {
                    if self.fragmentation && pending.data.len() > MSG_MIN {
                        // start a fragment group; emitted by step 2 below.
                        // The staged message stays queued so a broadcast
                        // can continue once the group drains.
                        let total = pending.data.len();
                        self.frag_out = Some(FragOut {
                            count: total.div_ceil(MSG_MIN) as u8,
                            remaining: total,
                            pos: 0,
                            peer_id,
                            data: pending.data.clone(),
                        });
                    } else {
                        let s = &mut self.slots[peer_id as usize];
                        s.remote_seq += 1;
                        if let Ok(len) = packet::encode(
                            buf,
                            s.remote_id,
                            s.remote_seq,
                            PayloadType::Userdata,
                            0,
                            &pending.data,
                            &s.crypto_ctx,
                        ) {
                            s.last_send = tnow;
                            result = Some((len, s.remote_addr));
                        }
                    }
                }
                if pending.broadcast && !exhausted {
                    self.outmsg = Some(pending);
                }
                if let Some(out) = result {
                    return Some(out);
                }
            }
        }

        // 2. fragment group in progress
        if let Some(mut frag) = self.frag_out.take() {
            let slot = frag.peer_id as usize;
            if self.is_active_remote(slot) {
                let off = frag.pos as usize * MSG_MIN;
                let chunk_len = frag.remaining.min(MSG_MIN);
                let options = (frag.count << 4) | frag.pos;
                let s = &mut self.slots[slot];
                s.remote_seq += 1;
                if let Ok(len) = packet::encode(
                    buf,
                    s.remote_id,
                    s.remote_seq,
                    PayloadType::UserdataFragment,
                    options,
                    &frag.data[off..off + chunk_len],
                    &s.crypto_ctx,
                ) {
                    s.last_send = tnow;
                    let target = s.remote_addr;
                    frag.pos += 1;
                    frag.remaining -= chunk_len;
                    if frag.remaining > 0 {
                        self.frag_out = Some(frag);
                    }
                    return Some((len, target));
                }
            }
            // target session vanished or encode failed: abort the group
        }

        // 3. request/response queue
        if let Some(rr) = self.rrmsg.take() {
            let slot = rr.peer_id as usize;
            if rr.data.len() < MSG_MAX && self.is_active_remote(slot) {
                let s = &mut self.slots[slot];
                s.remote_seq += 1;
                if let Ok(len) = packet::encode(
                    buf,
                    s.remote_id,
                    s.remote_seq,
                    rr.pl_type,
                    0,
                    &rr.data,
                    &s.crypto_ctx,
                ) {
                    s.last_send = tnow;
                    return Some((len, s.remote_addr));
                }
            }
        }

        // 4. keepalive sweep; expired sessions are deleted here
        let used = self.map.used();
        for _ in 0..used {
            let slot = self.map.next_id();
            if slot == 0 {
                continue;
            }
            if tnow - self.slots[slot].last_recv >= RECV_TIMEOUT {
                self.delete_peer_id(slot);
                continue;
            }
            if self.slots[slot].state == SlotState::Complete
                && tnow - self.slots[slot].last_send > KEEPALIVE_INTERVAL
            {
                let payload = self.gen_peerinfo();
                let s = &mut self.slots[slot];
                s.remote_seq += 1;
                if let Ok(len) = packet::encode(
                    buf,
                    s.remote_id,
                    s.remote_seq,
                    PayloadType::Peerinfo,
                    0,
                    &payload,
                    &s.crypto_ctx,
                ) {
                    s.last_send = tnow;
                    return Some((len, s.remote_addr));
                }
            }
        }

        // 5. handshake traffic, anonymous with a random nonce counter
        if let Some((msg, target)) = self.authmgt.next_msg(tnow) {
            if !msg.is_empty() {
                let seq = random::rand_u64();
                if let Ok(len) = packet::encode(
                    buf,
                    0,
                    seq,
                    PayloadType::Auth,
                    0,
                    &msg,
                    &self.slots[0].crypto_ctx,
                ) {
                    self.slots[0].last_send = tnow;
                    return Some((len, target));
                }
            }
        }

        // 6. opportunistic dial; never emits a datagram directly
        self.try_dial(tnow);
        None
    }

    /// Ask the handshake driver to approach a directory candidate, when
    /// enough auth slots are free and the dial throttle allows.
    fn try_dial(&mut self, tnow: i64) {
        if self.authmgt.used_slots() >= self.authmgt.capacity() / 2 {
            return;
        }
        if tnow - self.last_connect <= NEWCONNECT_INTERVAL {
            return;
        }
        let Some(idx) = self.nodedb.next_candidate(tnow, NEWCONNECT_MAX_AGE) else {
            return;
        };
        let Some(node_id) = self.nodedb.node_id(idx).copied() else {
            return;
        };
        if self.map.get(&node_id).is_some() {
            // already a live peer
            return;
        }
        let Some(addr) = self.nodedb.address(idx) else {
            return;
        };
        if self.authmgt.start(addr, tnow) {
            trace!(node_id = %node_id, %addr, "dialing");
            self.nodedb.update(
                node_id,
                None,
                tnow,
                UpdateInfo {
                    seen: false,
                    verified: false,
                    dialed: true,
                },
            );
            self.last_connect = tnow;
        }
    }
}
