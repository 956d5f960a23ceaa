//! Slot-pooled handshake driver.
//!
//! Each dial attempt or inbound handshake occupies one slot running a
//! `Noise_XX` exchange carried inside anonymous AUTH packets:
//!
//! ```text
//! M1  I -> R   noise e            payload: netid digest (clear)
//! M2  R -> I   noise e,ee,s,es    (responder identity proven)
//! M3  I -> R   noise s,se         payload: initiator ConnParams (encrypted)
//! M4  R -> I   sealed ConnParams  (session-key encrypted)
//! ```
//!
//! The peer manager drives this type through two hook pairs, polled after
//! every decoded message:
//!
//! 1. [`AuthMgt::authed_node_id`] - a peer has just proven its identity.
//!    The manager allocates a session slot and answers with
//!    [`AuthMgt::accept_authed_peer`] (handing over the local PeerID, the
//!    replay-window base and the local capability flags, which travel in
//!    M3/M4) or [`AuthMgt::reject_authed_peer`].
//! 2. [`AuthMgt::completed_node_id`] - session keys and the remote's
//!    connection parameters are ready; the manager copies them out and
//!    calls [`AuthMgt::finish_completed_peer`].
//!
//! Messages resend on a one-second cadence (suppressed by fastauth) until
//! the attempt times out. A finished responder lingers briefly so a lost
//! M4 can be retransmitted when M3 arrives again.

use crate::netid::NetId;
use crate::peeraddr::PeerAddr;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use umbra_crypto::{random, Handshake, NodeId, NodeKey, Role, SessionCrypto, SessionKeys};

/// Seconds before an unfinished attempt is abandoned.
pub const AUTH_TIMEOUT: i64 = 30;

/// Resend cadence for the current handshake message.
pub const AUTH_RESEND_INTERVAL: i64 = 1;

/// Seconds a finished responder slot lingers to retransmit M4.
const LINGER_TIMEOUT: i64 = 10;

const PHASE_M1: u8 = 1;
const PHASE_M2: u8 = 2;
const PHASE_M3: u8 = 3;
const PHASE_M4: u8 = 4;

const M4_AAD: &[u8] = b"umbra auth m4";

/// Connection parameters exchanged during authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnParams {
    /// Slot index the sending side allocated for this session.
    pub local_peer_id: u32,
    /// Base of the sending side's replay window; the receiver must start
    /// its outbound sequence numbers there.
    pub seq_base: u64,
    /// Sender's capability flags.
    pub flags: u16,
}

/// Plaintext envelope around every handshake message.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    sender_tag: u32,
    receiver_tag: u32,
    phase: u8,
    body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Initiator: M1 sent, waiting for M2.
    InitSent,
    /// Responder: M2 sent, waiting for M3.
    RespSent,
    /// Identity proven; waiting for the manager's accept/reject verdict.
    WaitAccept,
    /// Initiator: M3 sent, waiting for the responder's parameters.
    WaitM4,
    /// Keys and remote parameters ready for pickup.
    Completed,
    /// Responder: finished, retransmitting M4 on demand.
    Linger,
}

struct Slot {
    state: SlotState,
    role: Role,
    hs: Option<Handshake>,
    addr: PeerAddr,
    local_tag: u32,
    remote_tag: u32,
    started: i64,
    last_sent: i64,
    /// Send the current message on the next scheduler pass regardless of
    /// the resend throttle.
    send_armed: bool,
    last_msg: Vec<u8>,
    peer_node_id: Option<NodeId>,
    local_params: Option<ConnParams>,
    remote_params: Option<ConnParams>,
    keys: Option<SessionKeys>,
}

/// Handshake driver with a fixed pool of attempt slots.
pub struct AuthMgt {
    slots: Vec<Option<Slot>>,
    node_key: NodeKey,
    netid: NetId,
    fastauth: bool,
    pending_authed: Option<usize>,
    pending_completed: Option<usize>,
    cursor: usize,
}

impl AuthMgt {
    /// Create a driver with `capacity` attempt slots.
    #[must_use]
    pub fn new(capacity: usize, node_key: NodeKey, netid: NetId) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            node_key,
            netid,
            fastauth: false,
            pending_authed: None,
            pending_completed: None,
            cursor: 0,
        }
    }

    /// Replace the network identity used for new attempts.
    pub fn set_netid(&mut self, netid: NetId) {
        self.netid = netid;
    }

    /// Ignore the resend delay after a state change.
    pub fn set_fastauth(&mut self, enable: bool) {
        self.fastauth = enable;
    }

    /// Number of attempt slots in use.
    #[must_use]
    pub fn used_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Total attempt slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drop state from attempts that have been quiet too long.
    pub fn expire(&mut self, tnow: i64) {
        for (idx, entry) in self.slots.iter_mut().enumerate() {
            let timed_out = entry.as_ref().is_some_and(|s| {
                let limit = if s.state == SlotState::Linger {
                    LINGER_TIMEOUT
                } else {
                    AUTH_TIMEOUT
                };
                tnow - s.started > limit
            });
            if timed_out {
                trace!(slot = idx, "auth attempt expired");
                *entry = None;
                if self.pending_authed == Some(idx) {
                    self.pending_authed = None;
                }
                if self.pending_completed == Some(idx) {
                    self.pending_completed = None;
                }
            }
        }
    }

    /// Begin a handshake toward `addr`. Returns `false` when no slot is
    /// free or the handshake could not be constructed.
    pub fn start(&mut self, addr: PeerAddr, tnow: i64) -> bool {
        let Some(idx) = self.slots.iter().position(Option::is_none) else {
            return false;
        };
        let Ok(mut hs) = Handshake::initiator(&self.node_key) else {
            return false;
        };
        let Ok(m1) = hs.write_message(self.netid.as_bytes()) else {
            return false;
        };
        let local_tag = random::rand_u64() as u32;
        let msg = envelope(local_tag, 0, PHASE_M1, m1);
        self.slots[idx] = Some(Slot {
            state: SlotState::InitSent,
            role: Role::Initiator,
            hs: Some(hs),
            addr,
            local_tag,
            remote_tag: 0,
            started: tnow,
            last_sent: 0,
            send_armed: true,
            last_msg: msg,
            peer_node_id: None,
            local_params: None,
            remote_params: None,
            keys: None,
        });
        debug!(slot = idx, %addr, "handshake started");
        true
    }

    /// Feed one received AUTH payload into the driver.
    ///
    /// Returns `true` when the message advanced some attempt; the caller
    /// must then poll the authed/completed hooks.
    pub fn decode_msg(&mut self, msg: &[u8], source: PeerAddr, tnow: i64) -> bool {
        self.expire(tnow);
        let Ok(env) = bincode::deserialize::<Envelope>(msg) else {
            return false;
        };
        match env.phase {
            PHASE_M1 => self.handle_m1(&env, source, tnow),
            PHASE_M2 => self.handle_m2(&env, source),
            PHASE_M3 => self.handle_m3(&env, source),
            PHASE_M4 => self.handle_m4(&env, source),
            _ => false,
        }
    }

    fn slot_by_tag(&mut self, tag: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.local_tag == tag))
    }

    fn handle_m1(&mut self, env: &Envelope, source: PeerAddr, tnow: i64) -> bool {
        // retransmitted M1 for a live attempt: schedule an M2 resend
        for slot in self.slots.iter_mut().flatten() {
            if slot.role == Role::Responder
                && slot.remote_tag == env.sender_tag
                && slot.addr == source
            {
                slot.send_armed = true;
                return true;
            }
        }

        let Some(idx) = self.slots.iter().position(Option::is_none) else {
            return false;
        };
        let Ok(mut hs) = Handshake::responder(&self.node_key) else {
            return false;
        };
        let Ok(payload) = hs.read_message(&env.body) else {
            return false;
        };
        let Ok(digest) = <[u8; 32]>::try_from(payload.as_slice()) else {
            return false;
        };
        if NetId::from_bytes(digest) != self.netid {
            debug!("handshake rejected: wrong network id");
            return false;
        }
        let Ok(m2) = hs.write_message(&[]) else {
            return false;
        };
        let local_tag = random::rand_u64() as u32;
        let msg = envelope(local_tag, env.sender_tag, PHASE_M2, m2);
        self.slots[idx] = Some(Slot {
            state: SlotState::RespSent,
            role: Role::Responder,
            hs: Some(hs),
            addr: source,
            local_tag,
            remote_tag: env.sender_tag,
            started: tnow,
            last_sent: 0,
            send_armed: true,
            last_msg: msg,
            peer_node_id: None,
            local_params: None,
            remote_params: None,
            keys: None,
        });
        true
    }

    fn handle_m2(&mut self, env: &Envelope, source: PeerAddr) -> bool {
        let Some(idx) = self.slot_by_tag(env.receiver_tag) else {
            return false;
        };
        let Some(slot) = self.slots[idx].as_mut() else {
            return false;
        };
        if slot.role != Role::Initiator {
            return false;
        }
        match slot.state {
            SlotState::InitSent => {}
            // duplicate M2 after we moved on: schedule a resend of M3
            SlotState::WaitM4 => {
                slot.send_armed = true;
                return true;
            }
            _ => return false,
        }
        let Some(hs) = slot.hs.as_mut() else {
            return false;
        };
        if hs.read_message(&env.body).is_err() {
            return false;
        }
        let Some(remote_static) = hs.remote_static() else {
            return false;
        };
        slot.remote_tag = env.sender_tag;
        slot.addr = source;
        slot.peer_node_id = Some(NodeId::from_public_key(&remote_static));
        slot.state = SlotState::WaitAccept;
        self.pending_authed = Some(idx);
        true
    }

    fn handle_m3(&mut self, env: &Envelope, source: PeerAddr) -> bool {
        let Some(idx) = self.slot_by_tag(env.receiver_tag) else {
            return false;
        };
        let Some(slot) = self.slots[idx].as_mut() else {
            return false;
        };
        if slot.role != Role::Responder {
            return false;
        }
        match slot.state {
            SlotState::RespSent => {}
            // M4 was lost; send it again
            SlotState::Linger | SlotState::Completed => {
                slot.send_armed = true;
                return true;
            }
            _ => return false,
        }
        let Some(hs) = slot.hs.as_mut() else {
            return false;
        };
        let Ok(payload) = hs.read_message(&env.body) else {
            return false;
        };
        let Ok(params) = bincode::deserialize::<ConnParams>(&payload) else {
            return false;
        };
        let Some(remote_static) = hs.remote_static() else {
            return false;
        };
        slot.addr = source;
        slot.remote_params = Some(params);
        slot.peer_node_id = Some(NodeId::from_public_key(&remote_static));
        slot.state = SlotState::WaitAccept;
        self.pending_authed = Some(idx);
        true
    }

    fn handle_m4(&mut self, env: &Envelope, source: PeerAddr) -> bool {
        let Some(idx) = self.slot_by_tag(env.receiver_tag) else {
            return false;
        };
        let Some(slot) = self.slots[idx].as_mut() else {
            return false;
        };
        if slot.role != Role::Initiator || slot.state != SlotState::WaitM4 {
            return false;
        }
        if env.body.len() < 8 {
            return false;
        }
        let Some(keys) = slot.keys.as_ref() else {
            return false;
        };
        let counter = u64::from_be_bytes([
            env.body[0],
            env.body[1],
            env.body[2],
            env.body[3],
            env.body[4],
            env.body[5],
            env.body[6],
            env.body[7],
        ]);
        let ctx = SessionCrypto::from_keys(keys);
        let Ok(payload) = ctx.open(counter, M4_AAD, &env.body[8..]) else {
            return false;
        };
        let Ok(params) = bincode::deserialize::<ConnParams>(&payload) else {
            return false;
        };
        slot.addr = source;
        slot.remote_params = Some(params);
        slot.state = SlotState::Completed;
        slot.last_msg.clear();
        self.pending_completed = Some(idx);
        true
    }

    /// Node ID of the attempt waiting for an accept/reject verdict.
    #[must_use]
    pub fn authed_node_id(&self) -> Option<NodeId> {
        let slot = self.slots.get(self.pending_authed?)?.as_ref()?;
        slot.peer_node_id
    }

    /// Accept the pending authed peer, handing it the local session slot
    /// index, the local replay-window base and the local capability flags.
    pub fn accept_authed_peer(&mut self, peer_id: u32, seq_base: u64, flags: u16) {
        let Some(idx) = self.pending_authed.take() else {
            return;
        };
        let Some(mut slot) = self.slots[idx].take() else {
            return;
        };
        let params = ConnParams {
            local_peer_id: peer_id,
            seq_base,
            flags,
        };
        slot.local_params = Some(params);
        // a failure anywhere below drops the attempt
        match slot.role {
            Role::Initiator => {
                // write M3 carrying our parameters, then derive keys
                let Some(mut hs) = slot.hs.take() else { return };
                let Ok(body) = bincode::serialize(&params) else {
                    return;
                };
                let Ok(m3) = hs.write_message(&body) else {
                    return;
                };
                let Ok(keys) = hs.into_session_keys() else {
                    return;
                };
                slot.keys = Some(keys);
                slot.last_msg = envelope(slot.local_tag, slot.remote_tag, PHASE_M3, m3);
                slot.send_armed = true;
                slot.state = SlotState::WaitM4;
                self.slots[idx] = Some(slot);
            }
            Role::Responder => {
                // handshake already finished; derive keys and build M4
                let Some(hs) = slot.hs.take() else { return };
                let Ok(keys) = hs.into_session_keys() else {
                    return;
                };
                let ctx = SessionCrypto::from_keys(&keys);
                let counter = random::rand_u64();
                let Ok(body) = bincode::serialize(&params) else {
                    return;
                };
                let Ok(sealed) = ctx.seal(counter, M4_AAD, &body) else {
                    return;
                };
                let mut m4 = counter.to_be_bytes().to_vec();
                m4.extend_from_slice(&sealed);
                slot.keys = Some(keys);
                slot.last_msg = envelope(slot.local_tag, slot.remote_tag, PHASE_M4, m4);
                slot.send_armed = true;
                slot.state = SlotState::Completed;
                self.slots[idx] = Some(slot);
                self.pending_completed = Some(idx);
            }
        }
    }

    /// Reject the pending authed peer and drop its attempt.
    pub fn reject_authed_peer(&mut self) {
        if let Some(idx) = self.pending_authed.take() {
            debug!(slot = idx, "authed peer rejected");
            self.slots[idx] = None;
        }
    }

    /// Node ID of the attempt whose session is ready for pickup.
    #[must_use]
    pub fn completed_node_id(&self) -> Option<NodeId> {
        let slot = self.slots.get(self.pending_completed?)?.as_ref()?;
        slot.peer_node_id
    }

    /// Session slot index the manager accepted for the completed attempt.
    #[must_use]
    pub fn completed_local_id(&self) -> Option<u32> {
        let slot = self.slots.get(self.pending_completed?)?.as_ref()?;
        Some(slot.local_params?.local_peer_id)
    }

    /// Confirmed transport address of the completed peer, plus the slot
    /// index it allocated on its own side.
    #[must_use]
    pub fn completed_address(&self) -> Option<(u32, PeerAddr)> {
        let slot = self.slots.get(self.pending_completed?)?.as_ref()?;
        Some((slot.remote_params?.local_peer_id, slot.addr))
    }

    /// Session crypto context for the completed peer.
    #[must_use]
    pub fn completed_session_keys(&self) -> Option<SessionCrypto> {
        let slot = self.slots.get(self.pending_completed?)?.as_ref()?;
        slot.keys.as_ref().map(SessionCrypto::from_keys)
    }

    /// Remote sequence base and capability flags for the completed peer.
    #[must_use]
    pub fn completed_connection_params(&self) -> Option<(u64, u16)> {
        let slot = self.slots.get(self.pending_completed?)?.as_ref()?;
        let params = slot.remote_params?;
        Some((params.seq_base, params.flags))
    }

    /// Release the completed attempt. Responder slots linger to
    /// retransmit M4; initiator slots are freed immediately.
    pub fn finish_completed_peer(&mut self, tnow: i64) {
        let Some(idx) = self.pending_completed.take() else {
            return;
        };
        let Some(mut slot) = self.slots[idx].take() else {
            return;
        };
        if slot.role == Role::Responder {
            slot.state = SlotState::Linger;
            slot.started = tnow;
            self.slots[idx] = Some(slot);
        }
    }

    /// Next outbound handshake message whose resend timer expired.
    pub fn next_msg(&mut self, tnow: i64) -> Option<(Vec<u8>, PeerAddr)> {
        self.expire(tnow);
        let len = self.slots.len();
        for _ in 0..len {
            self.cursor = (self.cursor + 1) % len;
            let Some(slot) = self.slots[self.cursor].as_mut() else {
                continue;
            };
            if slot.last_msg.is_empty() {
                continue;
            }
            // finished responders only answer explicit retransmit requests
            let due = if slot.state == SlotState::Linger || slot.state == SlotState::Completed {
                slot.send_armed
            } else {
                slot.send_armed
                    || self.fastauth
                    || tnow - slot.last_sent >= AUTH_RESEND_INTERVAL
            };
            if due {
                slot.send_armed = false;
                slot.last_sent = tnow;
                return Some((slot.last_msg.clone(), slot.addr));
            }
        }
        None
    }
}

fn envelope(sender_tag: u32, receiver_tag: u32, phase: u8, body: Vec<u8>) -> Vec<u8> {
    let env = Envelope {
        sender_tag,
        receiver_tag,
        phase,
        body,
    };
    bincode::serialize(&env).unwrap_or_default()
}
