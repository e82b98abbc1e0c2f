//! Transport layer: sliding-window reliable byte stream with cumulative
//! acknowledgment, cyclic offsets, piggybacked and explicit acks, RTT
//! estimation, TCP-Reno-style congestion control, and per-connection
//! "gearing" that staggers segment submission.

use std::collections::VecDeque;

use netsim_wire::constants::{MAX_SEGMENT_OFFSET, MAX_WINDOW_OFFSET, MAX_WINDOW_SIZE, SEGMENT_MAX_PAYLOAD};
use netsim_wire::{Segment, SegmentHeader};
use tracing::{debug, trace};

use crate::config::FeatureFlags;
use crate::cyclic_buffer::CyclicBuffer;
use crate::dring::DoubleRing;
use crate::flat_map::FlatMap;
use crate::link::LinkLayer;
use crate::network::NetworkLayer;
use crate::sim::{AppTarget, NodeAddr, Simulator, TimerId, TimerKind};

const TRANSPORT_TIMEOUT_USEC: f64 = 1_000_000.0;
const ACK_TIME_USEC: u64 = 10_000;
const GEARING_BASE_USEC: u64 = 1;
const GEARING_STEP_USEC: u64 = 500;

/// Wrap-safe "has the peer acknowledged offset `x`, given cumulative ack
/// `ack`". Both values live in `[0, MAX_SEGMENT_OFFSET)`.
pub fn acknowledged(x: u32, ack: u32) -> bool {
    if x <= ack && ack - x <= MAX_WINDOW_OFFSET {
        return true;
    }
    (MAX_SEGMENT_OFFSET - x) + ack <= MAX_WINDOW_OFFSET
}

struct OutboundSegment {
    offset: u32,
    is_last: bool,
    payload: Vec<u8>,
    timer: Option<TimerId>,
    retransmissions: u32,
    send_time_usec: Option<u64>,
}

impl OutboundSegment {
    fn end_offset(&self) -> u32 {
        (self.offset + self.payload.len() as u32) % MAX_SEGMENT_OFFSET
    }
}

struct Connection {
    recv_buffer: CyclicBuffer,
    ring: DoubleRing,
    buffer_start: u32,
    outbound: VecDeque<OutboundSegment>,
    window_size: u32,
    threshold: u32,
    window_limit: u32,
    next_offset: u32,
    estimated_rtt_usec: f64,
    deviation_usec: f64,
    last_ack_sent_usec: u64,
    dup_ack_count: u32,
    last_ack_offset: u32,
}

impl Connection {
    fn new() -> Self {
        Connection {
            recv_buffer: CyclicBuffer::new(),
            ring: DoubleRing::new(MAX_WINDOW_OFFSET),
            buffer_start: 0,
            outbound: VecDeque::new(),
            window_size: 1,
            threshold: MAX_WINDOW_SIZE as u32,
            window_limit: MAX_WINDOW_SIZE as u32,
            next_offset: 0,
            estimated_rtt_usec: TRANSPORT_TIMEOUT_USEC,
            deviation_usec: TRANSPORT_TIMEOUT_USEC,
            last_ack_sent_usec: 0,
            dup_ack_count: 0,
            last_ack_offset: 0,
        }
    }

    fn computed_timeout_usec(&self) -> f64 {
        self.estimated_rtt_usec + 4.0 * self.deviation_usec
    }

    fn sample_rtt(&mut self, sample_usec: f64) {
        self.estimated_rtt_usec = 0.875 * self.estimated_rtt_usec + 0.125 * sample_usec;
        self.deviation_usec = 0.75 * self.deviation_usec + 0.25 * (sample_usec - self.estimated_rtt_usec).abs();
    }

    fn current_ack(&self) -> u32 {
        self.recv_buffer.next_invalid(self.buffer_start)
    }
}

pub struct TransportLayer {
    connections: FlatMap<NodeAddr, Connection>,
    flags: FeatureFlags,
}

impl TransportLayer {
    pub fn new(flags: FeatureFlags) -> Self {
        TransportLayer {
            connections: FlatMap::new(),
            flags,
        }
    }

    fn window_limit_for(&self, sim: &dyn Simulator, network: &NetworkLayer, dest: NodeAddr) -> u32 {
        let bandwidth = network
            .route(dest)
            .map(|link| sim.link_bandwidth(link))
            .unwrap_or(0) as f64;
        let num_connections = self.connections.len() as f64;
        let raw = (MAX_WINDOW_SIZE as f64 - num_connections) * bandwidth / 10_000_000.0;
        raw.clamp(1.0, MAX_WINDOW_SIZE as f64) as u32
    }

    /// `transport_transmit(dest, bytes, size)`.
    pub fn transmit(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, dest: NodeAddr, bytes: &[u8]) {
        let window_limit = self.window_limit_for(sim, network, dest);
        if !self.connections.contains_key(&dest) {
            self.connections.insert(dest, Connection::new());
        }
        let conn = self.connections.get_mut(&dest).unwrap();
        conn.window_limit = window_limit;

        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&[]]
        } else {
            bytes.chunks(SEGMENT_MAX_PAYLOAD).collect()
        };
        let last_idx = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let offset = conn.next_offset;
            conn.next_offset = (conn.next_offset + chunk.len() as u32) % MAX_SEGMENT_OFFSET;
            conn.outbound.push_back(OutboundSegment {
                offset,
                is_last: i == last_idx,
                payload: chunk.to_vec(),
                timer: None,
                retransmissions: 0,
                send_time_usec: None,
            });
        }

        if conn.outbound.len() as u32 > conn.window_size {
            sim.disable_application(AppTarget::Node(dest));
        }

        self.transmit_segments(sim, network, links, dest);
    }

    /// Walks the first `windowSize` outbound entries, staggering submission
    /// of never-yet-submitted ones via gearing timers (or submitting
    /// immediately when gearing is disabled).
    fn transmit_segments(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, dest: NodeAddr) {
        let conn = match self.connections.get_mut(&dest) {
            Some(conn) => conn,
            None => return,
        };
        let window = conn.window_size.max(1) as usize;
        let pending_offsets: Vec<u32> = conn
            .outbound
            .iter()
            .take(window)
            .filter(|seg| seg.timer.is_none() && seg.send_time_usec.is_none())
            .map(|seg| seg.offset)
            .collect();

        let use_gearing = self.flags.use_gearing;
        let mut delay = GEARING_BASE_USEC;
        for offset in pending_offsets {
            if use_gearing {
                let timer = sim.start_timer(TimerKind::Gearing, delay, encode_gearing_data(dest, offset));
                if let Some(conn) = self.connections.get_mut(&dest) {
                    if let Some(seg) = conn.outbound.iter_mut().find(|s| s.offset == offset) {
                        seg.timer = Some(timer);
                        seg.send_time_usec = Some(sim.now_usec());
                    }
                }
                delay += GEARING_STEP_USEC;
            } else {
                if let Some(conn) = self.connections.get_mut(&dest) {
                    if let Some(seg) = conn.outbound.iter_mut().find(|s| s.offset == offset) {
                        seg.send_time_usec = Some(sim.now_usec());
                    }
                }
                self.transmit_segment(sim, network, links, dest, offset);
            }
        }
    }

    /// Gearing-timer fire: hands off to `transmit_segment`.
    pub fn on_gearing_timer(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, dest: NodeAddr, offset: u32) {
        self.transmit_segment(sim, network, links, dest, offset);
    }

    /// `transmit_segment`: applies the Reno timeout reaction if warranted,
    /// then (re)transmits the segment if it's still within the live window.
    fn transmit_segment(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, dest: NodeAddr, offset: u32) {
        let conn = match self.connections.get_mut(&dest) {
            Some(conn) => conn,
            None => return,
        };

        let still_live = conn.outbound.iter().any(|s| s.offset == offset);
        if !still_live {
            // Already acknowledged and removed from the outbound list.
            return;
        }

        {
            let idx = conn.outbound.iter().position(|s| s.offset == offset).unwrap();
            let retransmissions = conn.outbound[idx].retransmissions;
            if retransmissions > 1 && conn.window_size > 1 {
                conn.threshold = (conn.window_size / 2).max(1);
                conn.window_size = 1;
                debug!(dest, offset, "reno_timeout_window_reduction");
            }
        }

        let ack_offset = conn.current_ack();
        let timeout_usec = conn.computed_timeout_usec();
        let idx = conn.outbound.iter().position(|s| s.offset == offset).unwrap();
        let (is_last, payload, retransmissions) = {
            let seg = &mut conn.outbound[idx];
            seg.retransmissions += 1;
            (seg.is_last, seg.payload.clone(), seg.retransmissions)
        };

        let header = SegmentHeader { offset, is_last, ack_offset };
        let wire = Segment { header, payload: bytes::Bytes::from(payload) };
        if let Ok(encoded) = wire.encode() {
            network
                .transmit(sim, links, dest, &encoded)
                .expect("transport_transmit: destination must be routable before a connection sends to it");
            trace!(dest, offset, is_last, "transmit_segment");
        }

        let delay = (retransmissions as f64 * timeout_usec).max(1.0) as u64;
        let timer = sim.start_timer(TimerKind::TransportRetransmit, delay, encode_gearing_data(dest, offset));
        if let Some(conn) = self.connections.get_mut(&dest) {
            if let Some(seg) = conn.outbound.iter_mut().find(|s| s.offset == offset) {
                seg.timer = Some(timer);
            }
        }
    }

    /// Transport retransmit-timer fire: re-enters `transmit_segment`.
    pub fn on_retransmit_timer(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, dest: NodeAddr, offset: u32) {
        self.transmit_segment(sim, network, links, dest, offset);
    }

    /// `transport_receive(src, bytes, size)`.
    pub fn receive(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, src: NodeAddr, bytes: &[u8]) {
        let segment = match Segment::decode(bytes) {
            Ok(segment) => segment,
            Err(_) => return,
        };

        if !self.connections.contains_key(&src) {
            self.connections.insert(src, Connection::new());
        }

        let has_payload = !segment.payload.is_empty();

        // 2. Duplicate-ack detection (Reno fast retransmit).
        if self.flags.use_reno {
            let conn = self.connections.get_mut(&src).unwrap();
            let is_dup = segment.header.ack_offset == conn.last_ack_offset && !has_payload;
            let mut fast_retransmit_offset = None;
            if is_dup {
                conn.dup_ack_count += 1;
            } else {
                if conn.dup_ack_count > 3 && has_payload {
                    conn.dup_ack_count = 0;
                    conn.threshold = (conn.window_size / 2).max(1);
                    conn.window_size = (conn.window_size / 2).max(1);
                    if let Some(head) = conn.outbound.front_mut() {
                        if let Some(timer) = head.timer.take() {
                            sim.stop_timer(timer);
                        }
                        fast_retransmit_offset = Some(head.offset);
                    }
                } else {
                    conn.dup_ack_count = 0;
                }
                conn.last_ack_offset = segment.header.ack_offset;
            }
            if let Some(offset) = fast_retransmit_offset {
                debug!(dest = src, offset, "reno_3_dup_ack");
                self.transmit_segment(sim, network, links, src, offset);
            }
        }

        let mut delivered_any = false;

        // 3. Receive new in-window data and reassemble complete messages.
        if has_payload {
            let conn = self.connections.get_mut(&src).unwrap();
            let end_of_range = (segment.header.offset + segment.payload.len() as u32) % MAX_SEGMENT_OFFSET;
            let already_acked = acknowledged(end_of_range, conn.current_ack());
            let already_valid = conn.recv_buffer.check(segment.header.offset);
            if !already_acked && !already_valid {
                conn.recv_buffer.store(segment.header.offset, &segment.payload);
                if segment.header.is_last {
                    let end = (segment.header.offset + segment.payload.len() as u32) % MAX_SEGMENT_OFFSET;
                    conn.ring.insert(end);
                }
                let mut ack = conn.current_ack();
                while let Some(end) = conn.ring.peek() {
                    if !acknowledged(end, ack) {
                        break;
                    }
                    conn.ring.pop();
                    let message_len = wrap_distance(conn.buffer_start, end);
                    let message = conn.recv_buffer.load(conn.buffer_start, message_len as usize);
                    sim.write_application(src, &message);
                    conn.buffer_start = end;
                    ack = conn.current_ack();
                    delivered_any = true;
                }
            }
        }

        // 4. Acknowledgment of outbound data and congestion-window growth.
        let now = sim.now_usec();
        loop {
            let conn = self.connections.get_mut(&src).unwrap();
            let covered = match conn.outbound.front() {
                Some(seg) => acknowledged(seg.end_offset(), segment.header.ack_offset),
                None => false,
            };
            if !covered {
                break;
            }
            let seg = conn.outbound.pop_front().unwrap();
            if let Some(timer) = seg.timer {
                sim.stop_timer(timer);
            }
            if let Some(send_time) = seg.send_time_usec {
                let sample = now.saturating_sub(send_time) as f64;
                conn.sample_rtt(sample);
                debug!(dest = src, offset = seg.offset, rtt_usec = sample, "update_rtt");
            }
            if conn.window_size < conn.threshold {
                conn.window_size = (conn.window_size * 2).min(conn.window_limit);
            } else if conn.window_size < conn.window_limit {
                conn.window_size += 1;
            }
        }

        // 5. Re-enable the application once the outbound list has room.
        let conn = self.connections.get_mut(&src).unwrap();
        if (conn.outbound.len() as u32) < conn.window_size {
            sim.enable_application(AppTarget::Node(src));
        }

        // 6. Re-enter gearing for anything still queued.
        let before = self.connections.get(&src).unwrap().outbound.iter().filter(|s| s.timer.is_some()).count();
        self.transmit_segments(sim, network, links, src);
        let after = self.connections.get(&src).unwrap().outbound.iter().filter(|s| s.timer.is_some()).count();
        let piggybacked = after > before;

        // 7. Explicit-ack policy.
        if self.flags.explicit_ack && has_payload && !piggybacked && !delivered_any {
            let conn = self.connections.get_mut(&src).unwrap();
            if now.saturating_sub(conn.last_ack_sent_usec) >= ACK_TIME_USEC {
                let ack_offset = conn.current_ack();
                let offset = conn.next_offset.wrapping_sub(1) % MAX_SEGMENT_OFFSET;
                let header = SegmentHeader { offset, is_last: false, ack_offset };
                let wire = Segment { header, payload: bytes::Bytes::new() };
                if let Ok(encoded) = wire.encode() {
                    network
                        .transmit(sim, links, src, &encoded)
                        .expect("transport_receive: peer must already be routable to have sent us a segment");
                    trace!(dest = src, "send_not_piggybacked_ack");
                }
                conn.last_ack_sent_usec = now;
            }
        }
    }

    /// Current window size for a connection, if one exists yet. Exposed for
    /// test/introspection use (§8 scenario assertions); not part of the
    /// domain logic itself.
    pub fn window_size(&self, peer: NodeAddr) -> Option<u32> {
        self.connections.get(&peer).map(|c| c.window_size)
    }

    pub fn estimated_rtt_usec(&self, peer: NodeAddr) -> Option<f64> {
        self.connections.get(&peer).map(|c| c.estimated_rtt_usec)
    }

    pub fn outbound_len(&self, peer: NodeAddr) -> Option<usize> {
        self.connections.get(&peer).map(|c| c.outbound.len())
    }

    pub fn buffer_start(&self, peer: NodeAddr) -> Option<u32> {
        self.connections.get(&peer).map(|c| c.buffer_start)
    }
}

/// Wrap-safe distance from `start` to `end`, both in `[0, MAX_SEGMENT_OFFSET)`.
fn wrap_distance(start: u32, end: u32) -> u32 {
    if end >= start {
        end - start
    } else {
        MAX_SEGMENT_OFFSET - start + end
    }
}

/// Packs a (dest, offset) pair into the opaque `u64` timer payload.
fn encode_gearing_data(dest: NodeAddr, offset: u32) -> u64 {
    ((dest as u64) << 32) | offset as u64
}

/// Unpacks a timer payload produced by [`encode_gearing_data`].
pub fn decode_gearing_data(data: u64) -> (NodeAddr, u32) {
    ((data >> 32) as NodeAddr, (data & 0xffff_ffff) as u32)
}
