//! Property-based tests for LanShare
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Checksum Properties
// ============================================================================

mod checksum_properties {
    use super::*;
    use lanshare_files::checksum::{StreamingChecksum, checksum_bytes};

    proptest! {
        /// The digest does not depend on how the stream is split
        #[test]
        fn digest_independent_of_chunking(
            data in prop::collection::vec(any::<u8>(), 0..8192),
            chunk in 1usize..2048,
        ) {
            let mut streaming = StreamingChecksum::new();
            for piece in data.chunks(chunk) {
                streaming.update(piece);
            }
            prop_assert_eq!(streaming.bytes_hashed(), data.len() as u64);
            prop_assert_eq!(streaming.finalize(), checksum_bytes(&data));
        }

        /// Hex form is 64 lowercase characters and parses back
        #[test]
        fn hex_digest_shape(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let digest = checksum_bytes(&data);
            let hex = digest.to_hex();
            prop_assert_eq!(hex.len(), 64);
            prop_assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            prop_assert_eq!(lanshare_files::Digest::from_hex(&hex), Some(digest));
        }
    }
}

// ============================================================================
// Wire Format Properties
// ============================================================================

mod handshake_properties {
    use super::*;
    use lanshare_core::protocol::{Handshake, MAX_FILE_NAME_LEN, MAX_SENDER_NAME_LEN};

    proptest! {
        /// Arbitrary bytes never panic the handshake parser
        #[test]
        fn decode_never_panics(body in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = Handshake::decode_body(&body);
        }

        /// Over-long names are cut to the limit on a character boundary
        #[test]
        fn long_names_truncate_cleanly(
            sender in "\\PC{200,400}",
            file in "[a-zé漢]{1,40}",
            repeat in 1usize..200,
            file_size in any::<u64>(),
            is_folder in any::<bool>(),
        ) {
            let handshake = Handshake {
                sender_name: sender.clone(),
                file_name: file.repeat(repeat),
                file_size,
                chunk_size: 64 * 1024,
                is_folder,
            };
            let decoded = Handshake::decode_body(&handshake.encode_body()).unwrap();

            prop_assert!(decoded.sender_name.len() <= MAX_SENDER_NAME_LEN);
            prop_assert!(decoded.file_name.len() <= MAX_FILE_NAME_LEN);
            prop_assert!(sender.starts_with(&decoded.sender_name));
            prop_assert!(handshake.file_name.starts_with(&decoded.file_name));
            prop_assert!(!decoded.file_name.is_empty());
            prop_assert_eq!(decoded.file_size, file_size);
            prop_assert_eq!(decoded.is_folder, is_folder);
        }
    }
}

mod announcement_properties {
    use super::*;
    use lanshare_discovery::Announcement;

    proptest! {
        /// Arbitrary datagrams never panic the announcement parser
        #[test]
        fn decode_never_panics(datagram in prop::collection::vec(any::<u8>(), 0..600)) {
            let _ = Announcement::decode(&datagram);
        }

        /// Trailing bytes appended by a later version are ignored
        #[test]
        fn trailing_bytes_ignored(
            id in "[a-f0-9]{1,32}",
            name in "\\PC{0,60}",
            port in any::<u16>(),
            tail in prop::collection::vec(any::<u8>(), 0..32),
        ) {
            let hello = Announcement::hello(id, name, port);
            let mut datagram = hello.encode();
            datagram.extend_from_slice(&tail);
            prop_assert_eq!(Announcement::decode(&datagram).unwrap(), hello);
        }
    }
}

// ============================================================================
// Registry Properties
// ============================================================================

mod registry_properties {
    use super::*;
    use lanshare_discovery::{Peer, PeerRegistry};
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};

    proptest! {
        /// Any sequence of upserts leaves unique IDs in first-seen order
        #[test]
        fn upserts_keep_first_seen_order(
            ops in prop::collection::vec((0u8..12, 1u16..u16::MAX), 0..100),
        ) {
            let registry = PeerRegistry::new();
            let mut first_seen = Vec::new();

            for (id, port) in &ops {
                let device_id = format!("peer-{id}");
                if !first_seen.contains(&device_id) {
                    first_seen.push(device_id.clone());
                }
                let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, *id));
                registry.upsert(Peer::new(&device_id, "device", ip, *port));
            }

            let ids: Vec<String> = registry.snapshot().into_iter().map(|p| p.device_id).collect();
            let unique: HashSet<&String> = ids.iter().collect();
            prop_assert_eq!(unique.len(), ids.len());
            prop_assert_eq!(ids, first_seen);
        }

        /// The last upsert for an ID wins
        #[test]
        fn last_upsert_wins(ports in prop::collection::vec(1u16..u16::MAX, 1..20)) {
            let registry = PeerRegistry::new();
            let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
            for port in &ports {
                registry.upsert(Peer::new("same", "device", ip, *port));
            }
            prop_assert_eq!(registry.len(), 1);
            prop_assert_eq!(registry.get("same").unwrap().port, *ports.last().unwrap());
        }

        /// Removing a peer keeps the others in order
        #[test]
        fn remove_preserves_order(count in 2u8..20, victim in 0u8..20) {
            let registry = PeerRegistry::new();
            for i in 0..count {
                let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, i));
                registry.upsert(Peer::new(&format!("p{i}"), "device", ip, 4000));
            }
            let victim = victim % count;
            let victim_id = format!("p{victim}");
            prop_assert!(registry.remove(&victim_id).is_some());

            let expected: Vec<String> = (0..count)
                .filter(|i| *i != victim)
                .map(|i| format!("p{i}"))
                .collect();
            let ids: Vec<String> = registry.snapshot().into_iter().map(|p| p.device_id).collect();
            prop_assert_eq!(ids, expected);
        }
    }
}
