//! Property tests for the wire codec, replay window and defragmenter.

use proptest::prelude::*;
use umbra_core::dfrag::Dfrag;
use umbra_core::packet::{self, PayloadType, OVERHEAD};
use umbra_core::seq::SeqState;
use umbra_core::{DGRAM_MAX, MSG_MAX, MSG_MIN};
use umbra_crypto::{SessionCrypto, SessionKeys};

fn paired() -> (SessionCrypto, SessionCrypto) {
    let tx = SessionKeys {
        send: [0x11; 32],
        recv: [0x22; 32],
        salt: [0x33; 4],
    };
    let rx = SessionKeys {
        send: [0x22; 32],
        recv: [0x11; 32],
        salt: [0x33; 4],
    };
    (SessionCrypto::from_keys(&tx), SessionCrypto::from_keys(&rx))
}

proptest! {
    #[test]
    fn packet_roundtrip(
        payload in proptest::collection::vec(any::<u8>(), 1..=MSG_MAX),
        base in 0u64..(u64::MAX / 2),
        peer_id in 0u32..4096,
        options in any::<u8>(),
    ) {
        let (tx, rx) = paired();
        let mut state = SeqState::new(base);
        let mut buf = vec![0u8; DGRAM_MAX];
        let seq = base + 1;
        let len = packet::encode(
            &mut buf, peer_id, seq, PayloadType::Userdata, options, &payload, &tx,
        ).unwrap();
        prop_assert_eq!(len, OVERHEAD + payload.len());
        prop_assert_eq!(packet::peer_id(&buf[..len]), Some(peer_id));

        let data = packet::decode(&buf[..len], &rx, Some(&mut state)).unwrap();
        prop_assert_eq!(data.peer_id, peer_id);
        prop_assert_eq!(data.seq, seq);
        prop_assert_eq!(data.options, options);
        prop_assert_eq!(data.payload, payload);
        // an exact replay is always rejected
        prop_assert!(packet::decode(&buf[..len], &rx, Some(&mut state)).is_err());
    }

    #[test]
    fn corrupted_packets_never_decode(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        flip_byte in 0usize..100,
    ) {
        let (tx, rx) = paired();
        let mut state = SeqState::new(0);
        let mut buf = vec![0u8; DGRAM_MAX];
        let len = packet::encode(&mut buf, 1, 1, PayloadType::Userdata, 0, &payload, &tx).unwrap();

        let mut bad = buf[..len].to_vec();
        let idx = flip_byte % len;
        bad[idx] ^= 0x01;
        // any single-bit corruption fails some check; the window stays clean
        prop_assert!(packet::decode(&bad, &rx, Some(&mut state)).is_err());
        prop_assert!(packet::decode(&buf[..len], &rx, Some(&mut state)).is_ok());
    }

    #[test]
    fn fragment_groups_reassemble(
        len in 1usize..=MSG_MAX,
        seed in any::<u64>(),
        epoch in any::<i64>(),
        peer_id in 1u32..64,
    ) {
        let msg: Vec<u8> = (0..len).map(|i| (seed.wrapping_add(i as u64) % 251) as u8).collect();
        let count = len.div_ceil(MSG_MIN);
        let mut dfrag = Dfrag::new();
        let mut completed = None;
        for pos in 0..count {
            let chunk = &msg[pos * MSG_MIN..len.min((pos + 1) * MSG_MIN)];
            let id = dfrag.assemble(epoch, peer_id, 1000, chunk, pos as u8, count as u8);
            if pos + 1 < count {
                prop_assert!(id.is_none());
            } else {
                completed = id;
            }
        }
        let id = completed.unwrap();
        prop_assert_eq!(dfrag.length(id), len);
        prop_assert_eq!(dfrag.payload(id).unwrap(), &msg[..]);
        dfrag.clear(id);
        prop_assert_eq!(dfrag.used(), 0);
    }

    #[test]
    fn seq_window_never_accepts_twice(
        base in 0u64..(u64::MAX / 2),
        offsets in proptest::collection::vec(1u64..10_000, 1..64),
    ) {
        let mut state = SeqState::new(base);
        for off in &offsets {
            let seq = base + off;
            if state.check(seq) {
                state.commit(seq);
                prop_assert!(!state.check(seq));
            }
        }
    }
}
