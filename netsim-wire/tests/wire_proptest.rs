//! Property-based round-trip and corruption-sensitivity tests for the wire
//! formats, generating arbitrary headers/payloads rather than fixed examples.

use bytes::Bytes;
use proptest::prelude::*;

use netsim_wire::constants::{MAX_NEIGHBOURS, MAX_SEGMENT_OFFSET, SEGMENT_MAX_PAYLOAD};
use netsim_wire::{Datagram, DatagramHeader, DistanceEntry, Frame, FrameHeader, RoutingSegment, Segment, SegmentHeader};

fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

proptest! {
    #[test]
    fn frame_round_trips_for_any_header_and_payload(
        id in 0u8..0x80,
        is_last in any::<bool>(),
        ordering in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = Frame {
            header: FrameHeader { id, is_last, ordering },
            payload: Bytes::from(payload),
        };
        let encoded = frame.encode(crc16);
        let decoded = Frame::decode(&encoded, crc16).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_single_bit_flip_in_payload_fails_checksum(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
        bit in 0u32..8,
    ) {
        let frame = Frame {
            header: FrameHeader { id: 5, is_last: false, ordering: 0 },
            payload: Bytes::from(payload),
        };
        let mut encoded = frame.encode(crc16).to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 1 << bit;
        prop_assert!(Frame::decode(&encoded, crc16).is_err());
    }

    #[test]
    fn segment_round_trips_for_any_offset_and_payload(
        offset in 0u32..MAX_SEGMENT_OFFSET,
        is_last in any::<bool>(),
        ack_offset in 0u32..MAX_SEGMENT_OFFSET,
        payload in proptest::collection::vec(any::<u8>(), 0..SEGMENT_MAX_PAYLOAD),
    ) {
        let segment = Segment {
            header: SegmentHeader { offset, is_last, ack_offset },
            payload: Bytes::from(payload),
        };
        let encoded = segment.encode().unwrap();
        let decoded = Segment::decode(&encoded).unwrap();
        prop_assert_eq!(decoded, segment);
    }

    #[test]
    fn datagram_round_trips_and_forwarding_decrements_hop_limit(
        src in any::<u8>(),
        dest in any::<u8>(),
        hop_limit in 1u8..=32,
        routing in any::<bool>(),
        payload in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let datagram = Datagram {
            header: DatagramHeader { src, dest, hop_limit, routing },
            payload: Bytes::from(payload.clone()),
        };
        let encoded = datagram.encode();
        let decoded = Datagram::decode(&encoded).unwrap();
        prop_assert_eq!(&decoded.payload[..], &payload[..]);
        let forwarded = decoded.header.forwarded();
        prop_assert_eq!(forwarded.map(|h| h.hop_limit), Some(hop_limit - 1));
    }

    #[test]
    fn routing_segment_round_trips_for_any_entry_count(
        seq_num in any::<u16>(),
        ack_num in any::<u16>(),
        n in 0usize..=MAX_NEIGHBOURS,
    ) {
        let entries: Vec<DistanceEntry> = (0..n)
            .map(|i| DistanceEntry { dest_addr: i as u32, weight: i as i32, min_mtu: 1500, min_bwd: 1_000_000 })
            .collect();
        let segment = RoutingSegment { seq_num, ack_num, entries };
        let encoded = segment.encode().unwrap();
        let decoded = RoutingSegment::decode(&encoded).unwrap();
        prop_assert_eq!(decoded, segment);
    }
}
