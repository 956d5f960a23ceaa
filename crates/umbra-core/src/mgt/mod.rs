//! The peer manager: session table, outbound scheduler, inbound dispatch.
//!
//! [`PeerMgt`] is the hub of the overlay. It owns a dense, fixed-capacity
//! table of session slots indexed by `PeerID`, where slot 0 is reserved for
//! the local node and for anonymous (pre-authentication) traffic. The host
//! drives it with exactly two entry points:
//!
//! - [`PeerMgt::handle_incoming`] for every datagram read off the socket;
//! - [`PeerMgt::take_next_outgoing`] whenever the socket is writable.
//!
//! Everything else - handshakes, keepalives, gossip, dialing, relaying,
//! fragmentation - happens inside those two calls. The manager is strictly
//! single-threaded; no locks, no atomics, no internal threads.
//!
//! A session slot moves `Invalid -> Authed -> Complete` over its lifetime
//! and back to `Invalid` on reset. Resets reseed the slot's crypto context
//! with random garbage, so packets addressed to a dead session can never
//! decrypt.

mod inbound;
mod outbound;
mod gossip;
mod send;
mod status;

#[cfg(test)]
mod tests;

use crate::authmgt::AuthMgt;
use crate::dfrag::Dfrag;
use crate::error::MgtError;
use crate::netid::NetId;
use crate::nodedb::NodeDb;
use crate::packet::PayloadType;
use crate::peeraddr::PeerAddr;
use crate::peermap::PeerMap;
use crate::seq::SeqState;
use crate::{MSG_MAX, NEWCONNECT_MAX_AGE};
use std::time::Instant;
use tracing::debug;
use umbra_crypto::{random, NodeId, NodeKey, SessionCrypto};

pub use send::RecvMsg;

/// Session slot states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Free.
    Invalid = 0,
    /// Identity proven, waiting for session keys.
    Authed = 1,
    /// Session keys installed; data may flow.
    Complete = 2,
}

/// One session slot.
pub(crate) struct PeerSlot {
    pub(crate) state: SlotState,
    /// Last confirmed source address; refreshed on every accepted packet.
    pub(crate) remote_addr: PeerAddr,
    /// Our slot index in the remote peer's table.
    pub(crate) remote_id: u32,
    /// Last sequence number sent to the peer; strictly increasing within
    /// one session epoch.
    pub(crate) remote_seq: u64,
    /// Capability flags the peer announced at completion.
    pub(crate) remote_flags: u16,
    /// Symmetric session keys.
    pub(crate) crypto_ctx: SessionCrypto,
    /// Replay window over sequence numbers received from the peer.
    pub(crate) seq_state: SeqState,
    /// Second at which the slot entered `Authed`; the session epoch tag.
    pub(crate) conn_time: i64,
    pub(crate) last_recv: i64,
    pub(crate) last_send: i64,
}

impl PeerSlot {
    fn empty() -> Self {
        Self {
            state: SlotState::Invalid,
            remote_addr: PeerAddr::Unspecified,
            remote_id: 0,
            remote_seq: 0,
            remote_flags: 0,
            crypto_ctx: SessionCrypto::random(),
            seq_state: SeqState::new(0),
            conn_time: 0,
            last_recv: 0,
            last_send: 0,
        }
    }
}

/// Monotonic second counter with a test-only skew hook.
pub(crate) struct Clock {
    origin: Instant,
    skew: i64,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            skew: 0,
        }
    }

    pub(crate) fn now(&self) -> i64 {
        self.origin.elapsed().as_secs() as i64 + self.skew
    }

    #[cfg(test)]
    pub(crate) fn advance(&mut self, secs: i64) {
        self.skew += secs;
    }
}

/// Staged unicast or broadcast userdata, depth one.
pub(crate) struct PendingMsg {
    pub(crate) data: Vec<u8>,
    pub(crate) peer_id: u32,
    pub(crate) broadcast: bool,
    /// Scheduler calls consumed by this broadcast so far.
    pub(crate) broadcast_count: usize,
}

/// Staged request/response packet (ping, pong, relay-out), depth one.
pub(crate) struct PendingRr {
    pub(crate) data: Vec<u8>,
    pub(crate) peer_id: u32,
    pub(crate) pl_type: PayloadType,
}

/// An in-progress outbound fragment group.
pub(crate) struct FragOut {
    pub(crate) data: Vec<u8>,
    pub(crate) peer_id: u32,
    pub(crate) count: u8,
    pub(crate) remaining: usize,
    pub(crate) pos: u8,
}

/// Construction parameters for [`PeerMgt`].
pub struct PeerMgtConfig {
    /// Number of remote session slots (slot 0 is added on top).
    pub peer_slots: usize,
    /// Number of concurrent handshake attempts.
    pub auth_slots: usize,
    /// Local long-term identity.
    pub node_key: NodeKey,
}

impl PeerMgtConfig {
    /// Bundle construction parameters.
    #[must_use]
    pub fn new(peer_slots: usize, auth_slots: usize, node_key: NodeKey) -> Self {
        Self {
            peer_slots,
            auth_slots,
            node_key,
        }
    }
}

/// The peer manager.
pub struct PeerMgt {
    pub(crate) netname: String,
    pub(crate) password: Vec<u8>,
    pub(crate) node_key: NodeKey,
    pub(crate) local_flags: u16,
    pub(crate) map: PeerMap,
    pub(crate) nodedb: NodeDb,
    pub(crate) authmgt: AuthMgt,
    pub(crate) dfrag: Dfrag,
    pub(crate) slots: Vec<PeerSlot>,
    /// Decoded inbound payload waiting for the host.
    pub(crate) msgbuf: Vec<u8>,
    pub(crate) msgsize: usize,
    pub(crate) msgpeerid: u32,
    pub(crate) outmsg: Option<PendingMsg>,
    pub(crate) rrmsg: Option<PendingRr>,
    pub(crate) frag_out: Option<FragOut>,
    pub(crate) loopback: bool,
    pub(crate) fragmentation: bool,
    pub(crate) last_connect: i64,
    pub(crate) clock: Clock,
}

impl PeerMgt {
    /// Create a peer manager.
    ///
    /// Slot 0 is pre-populated with the local node in `Complete` state and
    /// carries the anonymous group-password context. The default network
    /// name and password are both `"default"`.
    ///
    /// # Errors
    ///
    /// Returns [`MgtError::InvalidSlotCount`] when either slot count is
    /// zero. Any partially built state is dropped.
    pub fn new(config: &PeerMgtConfig) -> Result<Self, MgtError> {
        if config.peer_slots == 0 || config.auth_slots == 0 {
            return Err(MgtError::InvalidSlotCount {
                peer_slots: config.peer_slots,
                auth_slots: config.auth_slots,
            });
        }
        let netname = "default".to_string();
        let netid = NetId::from_name(&netname);
        let capacity = config.peer_slots + 1;
        let clock = Clock::new();
        let tnow = clock.now();

        let mut mgt = Self {
            netname,
            password: b"default".to_vec(),
            node_key: config.node_key.clone(),
            local_flags: 0,
            map: PeerMap::new(capacity),
            nodedb: NodeDb::new(config.peer_slots * 8 + 1, NEWCONNECT_MAX_AGE),
            authmgt: AuthMgt::new(config.auth_slots, config.node_key.clone(), netid),
            dfrag: Dfrag::new(),
            slots: (0..capacity).map(|_| PeerSlot::empty()).collect(),
            msgbuf: vec![0u8; MSG_MAX],
            msgsize: 0,
            msgpeerid: 0,
            outmsg: None,
            rrmsg: None,
            frag_out: None,
            loopback: false,
            fragmentation: false,
            last_connect: tnow,
            clock,
        };

        // slot 0 always represents the local node
        let local = mgt.node_key.node_id();
        let slot = mgt.map.insert(local);
        debug_assert_eq!(slot, Some(0));
        mgt.slots[0].state = SlotState::Complete;
        mgt.slots[0].conn_time = tnow;
        mgt.slots[0].last_recv = tnow;
        mgt.slots[0].last_send = tnow;
        mgt.refresh_group_context();
        debug!(node_id = %local, "peer manager initialized");
        Ok(mgt)
    }

    fn refresh_group_context(&mut self) {
        self.slots[0].crypto_ctx = SessionCrypto::from_password(&self.password, &self.netname);
    }

    /// The local node's identity.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_key.node_id()
    }

    /// Number of occupied session slots, the local one included.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.map.used()
    }

    /// Set the overlay network name.
    pub fn set_netname(&mut self, name: &str) {
        self.netname = name.to_string();
        self.authmgt.set_netid(NetId::from_name(name));
        self.refresh_group_context();
    }

    /// Set the shared group password protecting anonymous traffic.
    pub fn set_password(&mut self, password: &[u8]) {
        self.password = password.to_vec();
        self.refresh_group_context();
    }

    /// Deliver messages addressed to the local node through an in-memory
    /// shortcut instead of dropping them.
    pub fn set_loopback(&mut self, enable: bool) {
        self.loopback = enable;
    }

    /// Ignore the handshake resend delay.
    pub fn set_fastauth(&mut self, enable: bool) {
        self.authmgt.set_fastauth(enable);
    }

    /// Permit producing multi-fragment userdata.
    pub fn set_fragmentation(&mut self, enable: bool) {
        self.fragmentation = enable;
    }

    /// Set the capability flags advertised to peers.
    pub fn set_flags(&mut self, flags: u16) {
        self.local_flags = flags;
    }

    /// Whether a local capability flag is set.
    #[must_use]
    pub fn flag(&self, flag: u16) -> bool {
        self.local_flags & flag != 0
    }

    /// Whether a peer announced a capability flag.
    #[must_use]
    pub fn remote_flag(&self, peer_id: u32, flag: u16) -> bool {
        self.slots
            .get(peer_id as usize)
            .is_some_and(|s| s.remote_flags & flag != 0)
    }

    // --- slot table and ID resolution ---

    pub(crate) fn is_valid(&self, slot: usize) -> bool {
        slot < self.slots.len() && self.map.is_valid(slot)
    }

    pub(crate) fn is_active(&self, slot: usize) -> bool {
        self.is_valid(slot) && self.slots[slot].state == SlotState::Complete
    }

    pub(crate) fn is_active_remote(&self, slot: usize) -> bool {
        slot > 0 && self.is_active(slot)
    }

    /// Active remote slot whose session epoch still matches. The relay
    /// path uses this to refuse forwarding through replaced sessions.
    pub(crate) fn is_active_remote_ct(&self, slot: usize, conn_time: i64) -> bool {
        self.is_active_remote(slot) && self.slots[slot].conn_time == conn_time
    }

    /// Resolve a peer by node ID, slot index, or both.
    ///
    /// With both given, they must refer to the same active slot. Returns
    /// `None` for unknown or inactive peers.
    #[must_use]
    pub fn resolve(&self, node_id: Option<&NodeId>, peer_id: Option<u32>) -> Option<u32> {
        let mut out: Option<u32> = None;
        if let Some(node_id) = node_id {
            out = Some(self.map.get(node_id)? as u32);
        }
        if let Some(peer_id) = peer_id {
            match out {
                Some(resolved) if resolved != peer_id => return None,
                _ => out = Some(peer_id),
            }
        }
        let slot = out?;
        self.is_active(slot as usize).then_some(slot)
    }

    pub(crate) fn node_id_of(&self, slot: usize) -> Option<NodeId> {
        self.map.node_id(slot).copied()
    }

    /// Register a freshly authenticated peer in state `Authed`.
    pub(crate) fn new_peer(&mut self, node_id: NodeId, addr: PeerAddr, tnow: i64) -> Option<u32> {
        let slot = self.map.insert(node_id)?;
        let s = &mut self.slots[slot];
        s.state = SlotState::Authed;
        s.remote_addr = addr;
        s.remote_id = 0;
        s.remote_seq = 0;
        s.remote_flags = 0;
        s.conn_time = tnow;
        s.last_recv = tnow;
        s.last_send = tnow;
        // leave headroom so remote_seq cannot overflow within a session
        s.seq_state = SeqState::new(random::rand_u64() >> 1);
        debug!(slot, node_id = %node_id, "peer registered");
        Some(slot as u32)
    }

    /// Begin a handshake toward `addr` (a bootstrap peer or a known
    /// candidate). The session appears once the handshake completes.
    pub fn connect(&mut self, addr: PeerAddr) -> bool {
        let tnow = self.clock.now();
        self.authmgt.start(addr, tnow)
    }

    /// Build an indirect address for a peer reachable through an
    /// established relay session.
    ///
    /// `relay_peer_id` is the local slot of the relay; `target_peer_id` is
    /// the target's slot index *in the relay's table* (learned from the
    /// relay's peerinfo gossip). The encoding is pinned to the relay
    /// session's current epoch.
    #[must_use]
    pub fn relay_address(&self, relay_peer_id: u32, target_peer_id: u32) -> Option<PeerAddr> {
        let slot = relay_peer_id as usize;
        self.is_active_remote(slot).then(|| {
            PeerAddr::indirect(relay_peer_id, self.slots[slot].conn_time, target_peer_id)
        })
    }

    fn reset_slot(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.state = SlotState::Invalid;
        s.remote_addr = PeerAddr::Unspecified;
        s.crypto_ctx.reseed_random();
        self.dfrag.clear_peer(slot as u32);
    }

    /// Remove a remote peer's slot. Slot 0 is never deleted.
    pub(crate) fn delete_peer_id(&mut self, slot: usize) {
        if slot == 0 || !self.is_valid(slot) {
            return;
        }
        if let Some(node_id) = self.node_id_of(slot) {
            self.map.remove(&node_id);
            self.reset_slot(slot);
            debug!(slot, node_id = %node_id, "peer removed");
        }
    }

    #[cfg(test)]
    pub(crate) fn advance_clock(&mut self, secs: i64) {
        self.clock.advance(secs);
    }
}
