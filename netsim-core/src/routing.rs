//! Distance-vector routing, co-located with the network layer: a reliable
//! per-neighbor channel (sequence/ack numbers, fixed retransmit timer) carries
//! distance-vector updates that mutate the routing and forwarding tables.

use std::collections::VecDeque;

use netsim_wire::constants::MAX_NEIGHBOURS;
use netsim_wire::routing::INFINITY;
use netsim_wire::{DistanceEntry, RoutingSegment};
use tracing::debug;

use crate::flat_map::FlatMap;
use crate::link::LinkLayer;
use crate::network::NetworkLayer;
use crate::sim::{AppTarget, LinkIndex, NodeAddr, Simulator, TimerId, TimerKind};

const ROUTING_RETRANSMIT_USEC: u64 = 100_000;

/// `link_weight(link)`: monotonically decreasing in bandwidth.
pub fn link_weight(bandwidth: u32) -> f64 {
    let b = 100_000.0 / bandwidth as f64 - 5.0;
    10.0 * (-0.04 * b.powi(3) + 6.0)
}

struct InFlightSegment {
    seq: u16,
    bytes: Vec<u8>,
    timer: Option<TimerId>,
}

struct NeighborChannel {
    link: LinkIndex,
    neighbor: NodeAddr,
    next_send_seq: u16,
    expected_recv_seq: u16,
    unacked: VecDeque<InFlightSegment>,
}

impl NeighborChannel {
    fn new(link: LinkIndex, neighbor: NodeAddr) -> Self {
        NeighborChannel {
            link,
            neighbor,
            next_send_seq: 0,
            expected_recv_seq: 0,
            unacked: VecDeque::new(),
        }
    }
}

/// One row of the distance-vector routing table: per-link candidate values
/// for a destination, plus the currently-chosen best link.
struct RoutingRow {
    best_link: Option<LinkIndex>,
    best_weight: f64,
    via: FlatMap<LinkIndex, (f64, i32, i32)>, // link -> (weight, min_mtu, min_bwd)
}

impl RoutingRow {
    fn new() -> Self {
        RoutingRow {
            best_link: None,
            best_weight: f64::INFINITY,
            via: FlatMap::new(),
        }
    }
}

pub struct RoutingLayer {
    address: NodeAddr,
    channels: Vec<NeighborChannel>,
    table: FlatMap<NodeAddr, RoutingRow>,
}

impl RoutingLayer {
    /// `routing_init()`: creates neighbor state for every adjacent link and
    /// broadcasts this node's own initial distance entry.
    pub fn new(
        sim: &mut dyn Simulator,
        network: &mut NetworkLayer,
        links: &mut LinkLayer,
        neighbor_of: impl Fn(LinkIndex) -> NodeAddr,
    ) -> Self {
        let address = sim.address();
        let channels = (1..=links.num_links())
            .map(|link| NeighborChannel::new(link, neighbor_of(link)))
            .collect();
        let mut routing = RoutingLayer {
            address,
            channels,
            table: FlatMap::new(),
        };
        let own_entry = DistanceEntry {
            dest_addr: address as u32,
            weight: 0,
            min_mtu: INFINITY,
            min_bwd: INFINITY,
        };
        routing.broadcast(sim, network, links, vec![own_entry]);
        routing
    }

    fn channel_mut(&mut self, link: LinkIndex) -> Option<&mut NeighborChannel> {
        self.channels.iter_mut().find(|c| c.link == link)
    }

    fn broadcast(
        &mut self,
        sim: &mut dyn Simulator,
        network: &mut NetworkLayer,
        links: &mut LinkLayer,
        entries: Vec<DistanceEntry>,
    ) {
        let chunk: Vec<DistanceEntry> = entries.into_iter().take(MAX_NEIGHBOURS).collect();
        let link_indices: Vec<LinkIndex> = self.channels.iter().map(|c| c.link).collect();
        for link in link_indices {
            self.send_on_channel(sim, network, links, link, chunk.clone(), 0);
        }
    }

    fn send_on_channel(
        &mut self,
        sim: &mut dyn Simulator,
        network: &mut NetworkLayer,
        links: &mut LinkLayer,
        link: LinkIndex,
        entries: Vec<DistanceEntry>,
        ack_num: u16,
    ) {
        let neighbor = match self.channel_mut(link) {
            Some(c) => c.neighbor,
            None => return,
        };
        let seq = {
            let channel = self.channel_mut(link).unwrap();
            let seq = channel.next_send_seq;
            channel.next_send_seq = channel.next_send_seq.wrapping_add(1);
            seq
        };
        let segment = RoutingSegment { seq_num: seq, ack_num, entries };
        let bytes = match segment.encode() {
            Ok(bytes) => bytes.to_vec(),
            Err(_) => return,
        };
        network.transmit_routing(sim, links, link, neighbor, &bytes);
        let timer = sim.start_timer(TimerKind::RoutingRetransmit, ROUTING_RETRANSMIT_USEC, link as u64);
        self.channel_mut(link)
            .unwrap()
            .unacked
            .push_back(InFlightSegment { seq, bytes, timer: Some(timer) });
    }

    /// Sends a bare ack-only (or explicit re-solicitation) routing segment:
    /// no distance entries, carrying only the ack number. Unlike
    /// [`Self::send_on_channel`] this does not consume a fresh data sequence
    /// number and is never tracked in `unacked` or retransmitted — it's not
    /// new data, just an acknowledgment, so nothing on the wire ever needs to
    /// ack it back. Reusing (rather than advancing) `next_send_seq` also
    /// means the peer, which already advanced its `expected_recv_seq` past
    /// that value on our last real send, sees this as out-of-sequence and
    /// silently drops it instead of looping it back through the "new data"
    /// path.
    fn send_ack_only(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, link: LinkIndex, ack_num: u16) {
        let (neighbor, seq) = match self.channel_mut(link) {
            Some(c) => (c.neighbor, c.next_send_seq),
            None => return,
        };
        let segment = RoutingSegment { seq_num: seq, ack_num, entries: Vec::new() };
        if let Ok(bytes) = segment.encode() {
            network.transmit_routing(sim, links, link, neighbor, &bytes);
        }
    }

    /// Retransmit-timer fire: resend the head-of-queue routing segment on
    /// this neighbor link, per the failure semantics (indefinite retransmit
    /// at a fixed 100 ms interval).
    pub fn on_retransmit_timer(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, link: LinkIndex) {
        let neighbor = match self.channel_mut(link) {
            Some(c) => c.neighbor,
            None => return,
        };
        let resend = self.channel_mut(link).and_then(|c| c.unacked.front().map(|s| s.bytes.clone()));
        if let Some(bytes) = resend {
            network.transmit_routing(sim, links, link, neighbor, &bytes);
            let timer = sim.start_timer(TimerKind::RoutingRetransmit, ROUTING_RETRANSMIT_USEC, link as u64);
            if let Some(channel) = self.channel_mut(link) {
                if let Some(front) = channel.unacked.front_mut() {
                    front.timer = Some(timer);
                }
            }
        }
    }

    /// Processes a routing segment received on `link` from a neighbor.
    pub fn receive(&mut self, sim: &mut dyn Simulator, network: &mut NetworkLayer, links: &mut LinkLayer, link: LinkIndex, bytes: &[u8]) {
        let segment = match RoutingSegment::decode(bytes) {
            Ok(segment) => segment,
            Err(_) => return,
        };

        // 1. Acknowledgment processing: drop every in-flight segment whose
        // sequence number is strictly behind the incoming ack.
        if let Some(channel) = self.channel_mut(link) {
            while let Some(front) = channel.unacked.front() {
                if seq_lt(front.seq, segment.ack_num) {
                    let done = channel.unacked.pop_front().unwrap();
                    if let Some(timer) = done.timer {
                        sim.stop_timer(timer);
                    }
                } else {
                    break;
                }
            }
        }

        let expected = self.channel_mut(link).map(|c| c.expected_recv_seq).unwrap_or(0);
        if segment.seq_num == expected {
            if let Some(channel) = self.channel_mut(link) {
                channel.expected_recv_seq = channel.expected_recv_seq.wrapping_add(1);
            }
            let changed = self.apply_distance_entries(sim, network, link, &segment.entries);
            if changed.is_empty() {
                self.send_ack_only(sim, network, links, link, expected.wrapping_add(1));
            } else {
                self.broadcast(sim, network, links, changed);
            }
        } else if !segment.entries.is_empty() {
            // Out of order: re-solicit at the currently expected sequence.
            self.send_ack_only(sim, network, links, link, expected);
        }
    }

    /// Applies each incoming distance entry via `link`; returns the entries
    /// whose via-this-link value became the new best choice (to re-broadcast).
    fn apply_distance_entries(
        &mut self,
        sim: &mut dyn Simulator,
        network: &mut NetworkLayer,
        link: LinkIndex,
        entries: &[DistanceEntry],
    ) -> Vec<DistanceEntry> {
        let own = self.address as u32;
        let bandwidth = sim.link_bandwidth(link);
        let mtu = sim.link_mtu(link) as i32;
        let link_w = link_weight(bandwidth);

        let mut changed = Vec::new();
        for entry in entries {
            if entry.dest_addr == own {
                continue;
            }
            let weight = entry.weight as f64 + link_w;
            let min_mtu = entry.min_mtu.min(mtu);
            let min_bwd = entry.min_bwd.min(bandwidth as i32);

            let row = self.table.entry(entry.dest_addr).or_insert_with(RoutingRow::new);
            row.via.insert(link, (weight, min_mtu, min_bwd));

            let (mut best_link, mut best_weight) = (None, f64::INFINITY);
            for (candidate_link, (w, _, _)) in row.via.iter() {
                let better = *w < best_weight || (*w == best_weight && best_link.map_or(true, |b| *candidate_link < b));
                if better {
                    best_weight = *w;
                    best_link = Some(*candidate_link);
                }
            }

            let became_best_via_this_link = best_link == Some(link) && row.best_link != Some(link);
            row.best_link = best_link;
            row.best_weight = best_weight;

            if let Some(best) = best_link {
                network.set_route(entry.dest_addr as NodeAddr, best);
                sim.enable_application(AppTarget::Node(entry.dest_addr as NodeAddr));
                debug!(dest = entry.dest_addr, link = best, weight = best_weight, "enable_application_routing_converged");
            }

            if became_best_via_this_link {
                changed.push(DistanceEntry {
                    dest_addr: entry.dest_addr,
                    weight: weight as i32,
                    min_mtu,
                    min_bwd,
                });
            }
        }
        changed
    }

    pub fn in_flight_count(&self, link: LinkIndex) -> usize {
        self.channels.iter().find(|c| c.link == link).map(|c| c.unacked.len()).unwrap_or(0)
    }
}

/// Wrap-safe "strictly precedes" for 16-bit sequence numbers.
fn seq_lt(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}
