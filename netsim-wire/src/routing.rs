use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{DISTANCE_ENTRY_LEN, MAX_NEIGHBOURS, ROUTING_HEADER_LEN};
use crate::error::WireError;

/// Sentinel used for an unreachable destination's weight/MTU/bandwidth.
pub const INFINITY: i32 = i32::MAX;

/// One row of a distance-vector update: a destination and the sender's
/// current weight, minimum MTU, and minimum bandwidth along its path there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceEntry {
    pub dest_addr: u32,
    pub weight: i32,
    pub min_mtu: i32,
    pub min_bwd: i32,
}

impl DistanceEntry {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.dest_addr);
        buf.put_i32(self.weight);
        buf.put_i32(self.min_mtu);
        buf.put_i32(self.min_bwd);
    }

    fn decode(cursor: &mut &[u8]) -> Self {
        DistanceEntry {
            dest_addr: cursor.get_u32(),
            weight: cursor.get_i32(),
            min_mtu: cursor.get_i32(),
            min_bwd: cursor.get_i32(),
        }
    }
}

/// Routing-control PDU: sequence/ack pair for the reliable per-neighbor
/// channel, plus up to `MAX_NEIGHBOURS` distance entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSegment {
    pub seq_num: u16,
    pub ack_num: u16,
    pub entries: Vec<DistanceEntry>,
}

impl RoutingSegment {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        if self.entries.len() > MAX_NEIGHBOURS {
            return Err(WireError::TooManyDistanceEntries {
                count: self.entries.len(),
            });
        }
        let mut buf =
            BytesMut::with_capacity(ROUTING_HEADER_LEN + self.entries.len() * DISTANCE_ENTRY_LEN);
        buf.put_u16(self.seq_num);
        buf.put_u16(self.ack_num);
        for entry in &self.entries {
            entry.encode(&mut buf);
        }
        Ok(buf.freeze())
    }

    pub fn decode(bytes: &[u8]) -> Result<RoutingSegment, WireError> {
        if bytes.len() < ROUTING_HEADER_LEN {
            return Err(WireError::Truncated {
                kind: "routing segment",
                len: bytes.len(),
                min: ROUTING_HEADER_LEN,
            });
        }
        let mut cursor = bytes;
        let seq_num = cursor.get_u16();
        let ack_num = cursor.get_u16();

        if cursor.len() % DISTANCE_ENTRY_LEN != 0 {
            return Err(WireError::Truncated {
                kind: "distance entry",
                len: cursor.len(),
                min: DISTANCE_ENTRY_LEN,
            });
        }
        let count = cursor.len() / DISTANCE_ENTRY_LEN;
        if count > MAX_NEIGHBOURS {
            return Err(WireError::TooManyDistanceEntries { count });
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(DistanceEntry::decode(&mut cursor));
        }
        Ok(RoutingSegment {
            seq_num,
            ack_num,
            entries,
        })
    }
}
