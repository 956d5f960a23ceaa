//! End-to-end scenarios driving whole managers against each other.
//!
//! Datagrams are hand-carried between instances by a small in-memory
//! switch; nothing touches a real socket.

use super::*;
use crate::packet::OVERHEAD;
use crate::{DGRAM_MAX, FLAG_RELAY, FLAG_USERDATA, MSG_MAX, MSG_MIN, RECV_TIMEOUT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

fn addr(port: u16) -> PeerAddr {
    PeerAddr::Direct(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
}

fn new_mgt(flags: u16) -> PeerMgt {
    let config = PeerMgtConfig::new(16, 4, umbra_crypto::NodeKey::generate());
    let mut mgt = PeerMgt::new(&config).unwrap();
    mgt.set_netname("testnet");
    mgt.set_password(b"swordfish");
    mgt.set_flags(flags);
    mgt
}

/// Carry datagrams between managers, one per node per round, until all
/// schedulers go quiet.
fn pump(nodes: &mut [(&mut PeerMgt, PeerAddr)]) {
    let mut buf = [0u8; DGRAM_MAX];
    for _ in 0..64 {
        let mut progress = false;
        for i in 0..nodes.len() {
            let Some((len, target)) = nodes[i].0.take_next_outgoing(&mut buf) else {
                continue;
            };
            progress = true;
            let source = nodes[i].1;
            if let Some(j) = nodes.iter().position(|n| n.1 == target) {
                nodes[j].0.handle_incoming(&buf[..len], source);
            }
        }
        if !progress {
            break;
        }
    }
}

/// Establish a session between two managers over direct addresses.
fn establish(a: &mut PeerMgt, a_addr: PeerAddr, b: &mut PeerMgt, b_addr: PeerAddr) {
    assert!(a.connect(b_addr));
    pump(&mut [(a, a_addr), (b, b_addr)]);
}

#[test]
fn test_bootstrap() {
    let mgt = new_mgt(FLAG_USERDATA);
    let local = mgt.node_id();
    assert_eq!(mgt.node_id_of(0), Some(local));
    assert_eq!(mgt.slots[0].state, SlotState::Complete);
    assert_eq!(mgt.resolve(Some(&local), None), Some(0));
    assert_eq!(mgt.peer_count(), 1);
}

#[test]
fn test_handshake_to_quiescence() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let (a_node, b_node) = (a.node_id(), b.node_id());

    establish(&mut a, addr(1), &mut b, addr(2));

    let a_slot = a.resolve(Some(&b_node), None).expect("B active on A");
    let b_slot = b.resolve(Some(&a_node), None).expect("A active on B");
    assert!(a_slot > 0 && b_slot > 0);
    assert_eq!(a.slots[a_slot as usize].state, SlotState::Complete);
    assert_eq!(b.slots[b_slot as usize].state, SlotState::Complete);
    // each side addresses the other by the other's slot index
    assert_eq!(a.slots[a_slot as usize].remote_id, b_slot);
    assert_eq!(b.slots[b_slot as usize].remote_id, a_slot);
    assert_eq!(a.peer_count(), 2);
    assert_eq!(b.peer_count(), 2);
    // both sides advertised their flags
    assert!(a.remote_flag(a_slot, FLAG_USERDATA));
    assert!(b.remote_flag(b_slot, FLAG_USERDATA));
    // sequence starts come from each side's random window base
    assert!(a.slots[a_slot as usize].remote_seq > 0);
    assert!(b.slots[b_slot as usize].remote_seq > 0);
}

#[test]
fn test_userdata_roundtrip() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    let a_node = a.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));

    let msg: Vec<u8> = (0..900u32).map(|i| (i % 251) as u8).collect();
    assert!(a.send_userdata(&msg, Some(&b_node), None));

    let mut buf = [0u8; DGRAM_MAX];
    let (len, target) = a.take_next_outgoing(&mut buf).expect("one datagram");
    assert_eq!(target, addr(2));
    assert_eq!(len, OVERHEAD + msg.len());
    assert!(b.handle_incoming(&buf[..len], addr(1)));

    let recv = b.recv_userdata().expect("delivered");
    assert_eq!(recv.data, &msg[..]);
    assert_eq!(recv.from_node_id, Some(a_node));
    // the staging slot is consumed
    assert!(b.recv_userdata().is_none());
}

#[test]
fn test_userdata_requires_remote_flag() {
    let mut a = new_mgt(FLAG_USERDATA);
    // B never advertises USERDATA, so A must not emit toward it
    let mut b = new_mgt(0);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));
    assert!(a.resolve(Some(&b_node), None).is_some());

    assert!(a.send_userdata(b"hi", Some(&b_node), None));
    let mut buf = [0u8; DGRAM_MAX];
    assert!(a.take_next_outgoing(&mut buf).is_none());
}

#[test]
fn test_fragmented_userdata() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    a.set_fragmentation(true);
    establish(&mut a, addr(1), &mut b, addr(2));

    let msg: Vec<u8> = (0..3000u32).map(|i| (i % 199) as u8).collect();
    assert!(a.send_userdata(&msg, Some(&b_node), None));

    // exactly three fragments: 1024, 1024, 952 plaintext bytes
    let mut buf = [0u8; DGRAM_MAX];
    let mut sizes = Vec::new();
    while let Some((len, _)) = a.take_next_outgoing(&mut buf) {
        sizes.push(len - OVERHEAD);
        assert!(b.handle_incoming(&buf[..len], addr(1)));
    }
    assert_eq!(sizes, vec![MSG_MIN, MSG_MIN, 952]);

    let recv = b.recv_userdata().expect("reassembled");
    assert_eq!(recv.data, &msg[..]);
    assert_eq!(b.dfrag.used(), 0);
}

#[test]
fn test_fragment_out_of_order_delivery() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    a.set_fragmentation(true);
    establish(&mut a, addr(1), &mut b, addr(2));

    let msg: Vec<u8> = (0..2500u32).map(|i| (i % 97) as u8).collect();
    assert!(a.send_userdata(&msg, Some(&b_node), None));

    let mut buf = [0u8; DGRAM_MAX];
    let mut frames = Vec::new();
    while let Some((len, _)) = a.take_next_outgoing(&mut buf) {
        frames.push(buf[..len].to_vec());
    }
    assert_eq!(frames.len(), 3);
    // deliver reordered within the replay window
    assert!(b.handle_incoming(&frames[1], addr(1)));
    assert!(b.handle_incoming(&frames[0], addr(1)));
    assert!(b.handle_incoming(&frames[2], addr(1)));

    let recv = b.recv_userdata().expect("reassembled");
    assert_eq!(recv.data, &msg[..]);
}

#[test]
fn test_replay_dropped() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));

    assert!(a.send_userdata(b"once only", Some(&b_node), None));
    let mut buf = [0u8; DGRAM_MAX];
    let (len, _) = a.take_next_outgoing(&mut buf).unwrap();

    assert!(b.handle_incoming(&buf[..len], addr(1)));
    assert!(b.recv_userdata().is_some());
    // the replayed copy must be rejected and stage nothing
    assert!(!b.handle_incoming(&buf[..len], addr(1)));
    assert!(b.recv_userdata().is_none());
}

#[test]
fn test_loopback() {
    let mut a = new_mgt(FLAG_USERDATA);
    let local = a.node_id();
    a.set_loopback(true);

    assert!(a.send_userdata(b"to myself", Some(&local), None));
    let recv = a.recv_userdata().expect("looped back");
    assert_eq!(recv.data, b"to myself");
    assert_eq!(recv.from_peer_id, 0);
    assert_eq!(recv.from_node_id, Some(local));
}

#[test]
fn test_loopback_disabled() {
    let mut a = new_mgt(FLAG_USERDATA);
    let local = a.node_id();
    assert!(!a.send_userdata(b"to myself", Some(&local), None));
    assert!(a.recv_userdata().is_none());
}

#[test]
fn test_send_boundaries() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));

    assert!(!a.send_userdata(b"", Some(&b_node), None));
    assert!(!a.send_userdata(&vec![0u8; MSG_MAX + 1], Some(&b_node), None));
    assert!(a.send_userdata(&vec![0u8; MSG_MAX], Some(&b_node), None));

    // unknown recipient and mismatched handles resolve to nothing
    let stranger = umbra_crypto::NodeKey::generate().node_id();
    assert!(!a.send_userdata(b"x", Some(&stranger), None));
    let b_slot = a.resolve(Some(&b_node), None).unwrap();
    assert_eq!(a.resolve(Some(&b_node), Some(b_slot)), Some(b_slot));
    assert_eq!(a.resolve(Some(&b_node), Some(b_slot + 1)), None);
}

#[test]
fn test_broadcast_reaches_all_peers() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let mut c = new_mgt(FLAG_USERDATA);
    establish(&mut a, addr(1), &mut b, addr(2));
    establish(&mut a, addr(1), &mut c, addr(3));

    assert!(a.send_broadcast_userdata(b"hear ye"));
    let mut buf = [0u8; DGRAM_MAX];
    let mut deliveries = 0;
    while let Some((len, target)) = a.take_next_outgoing(&mut buf) {
        if target == addr(2) {
            assert!(b.handle_incoming(&buf[..len], addr(1)));
            deliveries += 1;
        } else if target == addr(3) {
            assert!(c.handle_incoming(&buf[..len], addr(1)));
            deliveries += 1;
        }
    }
    assert_eq!(deliveries, 2);
    assert_eq!(b.recv_userdata().unwrap().data, b"hear ye");
    assert_eq!(c.recv_userdata().unwrap().data, b"hear ye");
}

#[test]
fn test_broadcast_with_no_remotes() {
    let mut a = new_mgt(FLAG_USERDATA);
    assert!(a.send_broadcast_userdata(b"anyone?"));
    let mut buf = [0u8; DGRAM_MAX];
    assert!(a.take_next_outgoing(&mut buf).is_none());
    assert!(a.outmsg.is_none());
}

#[test]
fn test_staging_overwrites_same_class() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));

    assert!(a.send_userdata(b"first", Some(&b_node), None));
    assert!(a.send_userdata(b"second", Some(&b_node), None));
    let mut buf = [0u8; DGRAM_MAX];
    let (len, _) = a.take_next_outgoing(&mut buf).unwrap();
    assert!(b.handle_incoming(&buf[..len], addr(1)));
    assert_eq!(b.recv_userdata().unwrap().data, b"second");
    assert!(a.take_next_outgoing(&mut buf).is_none());
}

#[test]
fn test_ping_pong() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));

    assert!(a.send_ping(Some(&b_node), None));
    let mut buf = [0u8; DGRAM_MAX];
    let (len, target) = a.take_next_outgoing(&mut buf).unwrap();
    assert_eq!(target, addr(2));
    assert!(b.handle_incoming(&buf[..len], addr(1)));

    // B schedules a pong; pongs are received but deliberately unused
    let (len, target) = b.take_next_outgoing(&mut buf).unwrap();
    assert_eq!(target, addr(1));
    assert!(!a.handle_incoming(&buf[..len], addr(2)));
}

#[test]
fn test_ping_requires_remote_peer() {
    let mut a = new_mgt(FLAG_USERDATA);
    let local = a.node_id();
    assert!(!a.send_ping(Some(&local), None));
}

#[test]
fn test_keepalive_and_gossip_discovery() {
    // A and B both know R; gossip through R's keepalives lets A discover
    // and dial B without ever being configured with its address.
    let mut a = new_mgt(FLAG_USERDATA);
    let mut r = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();

    establish(&mut a, addr(1), &mut r, addr(2));
    establish(&mut b, addr(3), &mut r, addr(2));

    // R's keepalive timer fires and advertises its peers
    r.advance_clock(crate::KEEPALIVE_INTERVAL + 1);
    pump(&mut [(&mut a, addr(1)), (&mut r, addr(2)), (&mut b, addr(3))]);

    // A's dial throttle opens; discovery drives a handshake toward B.
    // The dial itself emits nothing, so give the schedulers a few quiet
    // ticks before the handshake datagrams start flowing.
    a.advance_clock(2);
    for _ in 0..5 {
        pump(&mut [(&mut a, addr(1)), (&mut r, addr(2)), (&mut b, addr(3))]);
    }

    assert!(a.resolve(Some(&b_node), None).is_some(), "B discovered via gossip");
}

#[test]
fn test_idle_timeout_deletes_session() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));
    assert!(a.resolve(Some(&b_node), None).is_some());

    a.advance_clock(RECV_TIMEOUT + 1);
    let mut buf = [0u8; DGRAM_MAX];
    // the sweep runs inside the scheduler tick
    let _ = a.take_next_outgoing(&mut buf);

    assert!(a.resolve(Some(&b_node), None).is_none());
    assert!(!a.send_userdata(b"too late", Some(&b_node), None));
    assert_eq!(a.peer_count(), 1);
}

#[test]
fn test_session_slot_reuse_after_timeout() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));
    let old_slot = a.resolve(Some(&b_node), None).unwrap();

    a.advance_clock(RECV_TIMEOUT + 1);
    let mut buf = [0u8; DGRAM_MAX];
    let _ = a.take_next_outgoing(&mut buf);
    assert!(a.resolve(Some(&b_node), None).is_none());

    // a fresh session with a different peer reoccupies the freed slot
    let mut c = new_mgt(FLAG_USERDATA);
    let c_node = c.node_id();
    establish(&mut a, addr(1), &mut c, addr(3));
    assert_eq!(a.resolve(Some(&c_node), None), Some(old_slot));
}

#[test]
fn test_relay_roundtrip() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut r = new_mgt(FLAG_USERDATA | FLAG_RELAY);
    let mut b = new_mgt(FLAG_USERDATA);
    let (a_node, r_node, b_node) = (a.node_id(), r.node_id(), b.node_id());

    establish(&mut a, addr(1), &mut r, addr(2));
    establish(&mut b, addr(3), &mut r, addr(2));

    // A authenticates to B entirely through R
    let r_on_a = a.resolve(Some(&r_node), None).unwrap();
    let b_on_r = r.resolve(Some(&b_node), None).unwrap();
    let via = a.relay_address(r_on_a, b_on_r).expect("relay address");
    assert!(a.connect(via));
    pump(&mut [(&mut a, addr(1)), (&mut r, addr(2)), (&mut b, addr(3))]);

    let b_on_a = a.resolve(Some(&b_node), None).expect("session via relay");
    assert!(a.slots[b_on_a as usize].remote_addr.is_internal());
    assert!(b.resolve(Some(&a_node), None).is_some());

    // userdata flows A -> R -> B
    let msg: Vec<u8> = (0..700u32).map(|i| (i % 83) as u8).collect();
    assert!(a.send_userdata(&msg, Some(&b_node), None));
    pump(&mut [(&mut a, addr(1)), (&mut r, addr(2)), (&mut b, addr(3))]);

    let recv = b.recv_userdata().expect("relayed delivery");
    assert_eq!(recv.data, &msg[..]);
    assert_eq!(recv.from_node_id, Some(a_node));

    // and back, B -> R -> A
    assert!(b.send_userdata(b"echo", Some(&a_node), None));
    pump(&mut [(&mut a, addr(1)), (&mut r, addr(2)), (&mut b, addr(3))]);
    assert_eq!(a.recv_userdata().expect("reverse path").data, b"echo");
}

#[test]
fn test_relay_requires_flag() {
    let mut a = new_mgt(FLAG_USERDATA);
    // R does not volunteer as a relay
    let mut r = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let (r_node, b_node) = (r.node_id(), b.node_id());

    establish(&mut a, addr(1), &mut r, addr(2));
    establish(&mut b, addr(3), &mut r, addr(2));

    let r_on_a = a.resolve(Some(&r_node), None).unwrap();
    let b_on_r = r.resolve(Some(&b_node), None).unwrap();
    let via = a.relay_address(r_on_a, b_on_r).unwrap();
    assert!(a.connect(via));
    pump(&mut [(&mut a, addr(1)), (&mut r, addr(2)), (&mut b, addr(3))]);

    assert!(a.resolve(Some(&b_node), None).is_none());
}

#[test]
fn test_relay_via_replaced_session_refused() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut r = new_mgt(FLAG_USERDATA | FLAG_RELAY);
    let r_node = r.node_id();
    establish(&mut a, addr(1), &mut r, addr(2));

    let r_on_a = a.resolve(Some(&r_node), None).unwrap();
    let via = a.relay_address(r_on_a, 7).unwrap();
    // forge a stale epoch: a relay address minted for a previous session
    let (relay_id, relay_ct, inner) = via.get_indirect().unwrap();
    let stale = PeerAddr::indirect(relay_id, relay_ct - 1, inner);

    assert!(a.connect(stale));
    let mut buf = [0u8; DGRAM_MAX];
    // the wrapped handshake message is dropped at encapsulation time
    assert!(a.take_next_outgoing(&mut buf).is_none());
}

#[test]
fn test_duplicate_identity_rejected() {
    // a second handshake from an identity that already has a live session
    // must not replace it
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    let b_node = b.node_id();
    establish(&mut a, addr(1), &mut b, addr(2));
    let slot = a.resolve(Some(&b_node), None).unwrap();
    let epoch = a.slots[slot as usize].conn_time;

    assert!(b.connect(addr(1)));
    pump(&mut [(&mut a, addr(1)), (&mut b, addr(2))]);

    // the original session survives untouched
    assert_eq!(a.resolve(Some(&b_node), None), Some(slot));
    assert_eq!(a.slots[slot as usize].conn_time, epoch);
    assert_eq!(a.peer_count(), 2);
}

#[test]
fn test_status_report_layout() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    establish(&mut a, addr(1), &mut b, addr(2));

    let report = a.status();
    assert!(report.ends_with('\0'));
    let body = report.trim_end_matches('\0');
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3, "header plus one row per valid slot");
    assert!(lines[0].starts_with("PeerID    NodeID"));
    assert_eq!(lines[0].len(), 154);
    for row in &lines[1..] {
        assert_eq!(row.len(), 154);
    }
    // slot 0 row carries the local node id
    assert!(lines[1].starts_with("00000000"));
    assert!(lines[1].contains(&a.node_id().to_string()));
}

#[test]
fn test_wrong_password_no_session() {
    let mut a = new_mgt(FLAG_USERDATA);
    let mut b = new_mgt(FLAG_USERDATA);
    b.set_password(b"different");

    assert!(a.connect(addr(2)));
    pump(&mut [(&mut a, addr(1)), (&mut b, addr(2))]);
    assert_eq!(a.peer_count(), 1);
    assert_eq!(b.peer_count(), 1);
}

#[test]
fn test_garbage_datagrams_ignored() {
    let mut a = new_mgt(FLAG_USERDATA);
    assert!(!a.handle_incoming(&[], addr(9)));
    assert!(!a.handle_incoming(&[0u8; 8], addr(9)));
    assert!(!a.handle_incoming(&[0u8; 31], addr(9)));
    let mut junk = [0u8; 200];
    umbra_crypto::random::rand_bytes(&mut junk);
    // random bytes almost surely address a non-zero, inactive slot
    assert!(!a.handle_incoming(&junk, addr(9)));
    assert_eq!(a.peer_count(), 1);
}
