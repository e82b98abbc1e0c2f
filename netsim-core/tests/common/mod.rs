//! A small discrete-event test harness driving one or more [`Node`]s across a
//! lossless, in-memory physical fabric. Not part of the crate under test:
//! this is the "external collaborator" the `Simulator` trait exists to keep
//! out of the core, reimplemented here just far enough to exercise the whole
//! stack end to end.
#![allow(dead_code)]

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use netsim_core::{AppTarget, Config, FeatureFlags, LinkIndex, LinkTopology, LogVerbosity, Node, NodeAddr, PhysicalStatus, Simulator, TimerId, TimerKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const PROPAGATION_USEC: u64 = 2_000;

/// Decodes a raw frame as handed to the physical fabric all the way down to
/// a transport segment's header offset, for scenario tests that need to
/// recognize a specific in-flight segment (e.g. "the one carrying offset
/// 1024") to drop or delay it deterministically. `None` for anything that
/// isn't a single-frame, non-routing user-data segment (multi-fragment
/// datagrams and routing traffic aren't relevant to those scenarios).
pub fn decode_segment_offset(frame_bytes: &[u8]) -> Option<u32> {
    let frame = netsim_wire::Frame::decode(frame_bytes, crc16).ok()?;
    if !frame.header.is_last || frame.header.ordering != 0 {
        return None;
    }
    let datagram = netsim_wire::Datagram::decode(&frame.payload).ok()?;
    if datagram.header.routing {
        return None;
    }
    let segment = netsim_wire::Segment::decode(&datagram.payload).ok()?;
    Some(segment.header.offset)
}

pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

struct PendingTimer {
    time: u64,
    id: TimerId,
    kind: TimerKind,
    data: u64,
}

/// One node's simulator: its own clock and timers, and the application
/// messages it has received. `write_physical` only records what was handed
/// down; cross-node delivery is the [`Harness`]'s job.
struct NodeSim {
    address: NodeAddr,
    now: u64,
    next_timer_id: TimerId,
    timers: Vec<PendingTimer>,
    links: Vec<(u32, usize)>,
    received: Vec<(NodeAddr, Vec<u8>)>,
    pending_out: Vec<(LinkIndex, Vec<u8>)>,
}

impl NodeSim {
    fn new(address: NodeAddr, links: Vec<(u32, usize)>) -> Self {
        NodeSim {
            address,
            now: 0,
            next_timer_id: 1,
            timers: Vec::new(),
            links,
            received: Vec::new(),
            pending_out: Vec::new(),
        }
    }
}

impl Simulator for NodeSim {
    fn address(&self) -> NodeAddr {
        self.address
    }
    fn num_links(&self) -> usize {
        self.links.len()
    }
    fn now_usec(&self) -> u64 {
        self.now
    }
    fn link_bandwidth(&self, link: LinkIndex) -> u32 {
        self.links[link - 1].0
    }
    fn link_mtu(&self, link: LinkIndex) -> usize {
        self.links[link - 1].1
    }
    fn crc16(&self, bytes: &[u8]) -> u16 {
        crc16(bytes)
    }
    fn read_application(&mut self) -> Option<(NodeAddr, Vec<u8>)> {
        None
    }
    fn write_application(&mut self, src: NodeAddr, data: &[u8]) {
        self.received.push((src, data.to_vec()));
    }
    fn enable_application(&mut self, _target: AppTarget) {}
    fn disable_application(&mut self, _target: AppTarget) {}
    fn write_physical(&mut self, link: LinkIndex, data: &[u8]) -> PhysicalStatus {
        self.pending_out.push((link, data.to_vec()));
        PhysicalStatus::Sent
    }
    fn start_timer(&mut self, kind: TimerKind, usec: u64, data: u64) -> TimerId {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.push(PendingTimer { time: self.now + usec, id, kind, data });
        id
    }
    fn stop_timer(&mut self, id: TimerId) {
        self.timers.retain(|t| t.id != id);
    }
}

struct Delivery {
    time: u64,
    node: usize,
    link: LinkIndex,
    bytes: Vec<u8>,
}

impl PartialEq for Delivery {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
    }
}
impl Eq for Delivery {}
impl PartialOrd for Delivery {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Delivery {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time.cmp(&other.time)
    }
}

/// A point-to-point link between two nodes by index into the addresses slice
/// passed to [`Harness::new`].
pub struct LinkDef {
    pub a: usize,
    pub a_link: LinkIndex,
    pub b: usize,
    pub b_link: LinkIndex,
    pub bandwidth: u32,
    pub mtu: usize,
}

/// A link's fault model: independent per-frame probabilities of loss and
/// duplication, plus random jitter added on top of the fixed propagation
/// delay (which is what produces reordering among frames in flight).
#[derive(Clone, Copy)]
pub struct FaultModel {
    pub loss_prob: f64,
    pub duplicate_prob: f64,
    pub jitter_usec: u64,
}

impl Default for FaultModel {
    fn default() -> Self {
        FaultModel { loss_prob: 0.0, duplicate_prob: 0.0, jitter_usec: 0 }
    }
}

pub struct Harness {
    nodes: Vec<Node>,
    sims: Vec<NodeSim>,
    peer_of: Vec<Vec<(usize, LinkIndex)>>,
    deliveries: BinaryHeap<Reverse<Delivery>>,
    now: u64,
    fault: FaultModel,
    rng: StdRng,
    /// Consumed on first match: drops exactly one frame satisfying the
    /// predicate, then stops intercepting (so retransmissions get through).
    /// Deterministic counterpart to `fault.loss_prob`, for scenarios that
    /// need a specific frame lost rather than a random one.
    drop_once: Option<Box<dyn Fn(&[u8]) -> bool>>,
    /// Per-frame delay override (in place of the default propagation delay),
    /// for scenarios that need an exact, reproducible arrival order.
    delay_override: Option<Box<dyn Fn(&[u8]) -> u64>>,
}

impl Harness {
    pub fn new(addresses: &[NodeAddr], links: &[LinkDef]) -> Self {
        Self::new_with_fault(addresses, links, FaultModel::default(), 0)
    }

    /// Like [`Harness::new`], but every frame handed to the physical fabric
    /// is independently subject to `fault`'s loss/duplication/jitter — a
    /// lossy, reordering, duplicating link, deterministic for a given `seed`.
    pub fn new_with_fault(addresses: &[NodeAddr], links: &[LinkDef], fault: FaultModel, seed: u64) -> Self {
        let n = addresses.len();
        let mut topo: Vec<Vec<(u32, usize)>> = vec![Vec::new(); n];
        let mut peer_of: Vec<Vec<(usize, LinkIndex)>> = vec![Vec::new(); n];

        let mut place = |table: &mut Vec<Vec<(u32, usize)>>, node: usize, link: LinkIndex, value: (u32, usize)| {
            if table[node].len() < link {
                table[node].resize(link, (0, 0));
            }
            table[node][link - 1] = value;
        };
        let mut place_peer = |table: &mut Vec<Vec<(usize, LinkIndex)>>, node: usize, link: LinkIndex, value: (usize, LinkIndex)| {
            if table[node].len() < link {
                table[node].resize(link, (usize::MAX, 0));
            }
            table[node][link - 1] = value;
        };

        for l in links {
            place(&mut topo, l.a, l.a_link, (l.bandwidth, l.mtu));
            place(&mut topo, l.b, l.b_link, (l.bandwidth, l.mtu));
            place_peer(&mut peer_of, l.a, l.a_link, (l.b, l.b_link));
            place_peer(&mut peer_of, l.b, l.b_link, (l.a, l.a_link));
        }

        let mut sims: Vec<NodeSim> = addresses
            .iter()
            .zip(topo.into_iter())
            .map(|(&addr, t)| NodeSim::new(addr, t))
            .collect();

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let peers = peer_of[i].clone();
            let addrs: Vec<NodeAddr> = addresses.to_vec();
            let config = Config {
                address: sims[i].address,
                links: sims[i].links.iter().map(|&(bandwidth, mtu)| LinkTopology { bandwidth, mtu }).collect(),
                flags: FeatureFlags::default(),
                log_verbosity: LogVerbosity::default(),
            };
            let node = Node::new(&mut sims[i], &config, move |link| addrs[peers[link - 1].0]);
            nodes.push(node);
        }

        let mut harness = Harness {
            nodes,
            sims,
            peer_of,
            deliveries: BinaryHeap::new(),
            now: 0,
            fault,
            rng: StdRng::seed_from_u64(seed),
            drop_once: None,
            delay_override: None,
        };
        for i in 0..n {
            harness.drain_outbox(i);
        }
        harness
    }

    /// Deterministic, single-shot frame drop: the first frame handed to the
    /// fabric for which `predicate` returns `true` is dropped; every later
    /// frame (including its own retransmission) passes through unaffected.
    pub fn set_drop_once(&mut self, predicate: impl Fn(&[u8]) -> bool + 'static) {
        self.drop_once = Some(Box::new(predicate));
    }

    /// Per-frame delay override: `f(bytes)` replaces the default propagation
    /// delay for any frame it matches, letting a test force an exact arrival
    /// order among frames sent together.
    pub fn set_delay_override(&mut self, f: impl Fn(&[u8]) -> u64 + 'static) {
        self.delay_override = Some(Box::new(f));
    }

    fn drain_outbox(&mut self, node: usize) {
        let now = self.now;
        let sent = std::mem::take(&mut self.sims[node].pending_out);
        for (link, bytes) in sent {
            let (peer, peer_link) = self.peer_of[node][link - 1];

            if let Some(predicate) = &self.drop_once {
                if predicate(&bytes) {
                    self.drop_once = None;
                    continue;
                }
            }
            if self.fault.loss_prob > 0.0 && self.rng.gen_bool(self.fault.loss_prob) {
                continue;
            }

            let base_delay = match &self.delay_override {
                Some(f) => f(&bytes),
                None => PROPAGATION_USEC,
            };
            let copies = if self.fault.duplicate_prob > 0.0 && self.rng.gen_bool(self.fault.duplicate_prob) {
                2
            } else {
                1
            };
            for _ in 0..copies {
                let jitter = if self.fault.jitter_usec > 0 { self.rng.gen_range(0..=self.fault.jitter_usec) } else { 0 };
                self.deliveries.push(Reverse(Delivery {
                    time: now + base_delay + jitter,
                    node: peer,
                    link: peer_link,
                    bytes: bytes.clone(),
                }));
            }
        }
    }

    /// The application on `node` has a message ready to send to `dest`.
    pub fn send(&mut self, node: usize, dest: NodeAddr, bytes: &[u8]) {
        self.sims[node].now = self.now;
        self.nodes[node].send(&mut self.sims[node], dest, bytes);
        self.drain_outbox(node);
    }

    /// Processes timer fires and scheduled deliveries, earliest first, until
    /// none remain or `deadline` is passed. Returns the number processed.
    pub fn run_until(&mut self, deadline: u64) -> usize {
        let mut processed = 0;
        loop {
            let next_timer = self
                .sims
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.timers.iter().map(|t| t.time).min().map(|t| (t, i)))
                .min_by_key(|&(t, _)| t);
            let next_delivery = self.deliveries.peek().map(|Reverse(d)| d.time);

            let time = match (next_timer, next_delivery) {
                (Some((a, _)), Some(b)) => a.min(b),
                (Some((a, _)), None) => a,
                (None, Some(b)) => b,
                (None, None) => break,
            };
            if time > deadline {
                break;
            }
            self.now = time;

            let delivery_first = next_delivery.map(|d| d <= next_timer.map(|(t, _)| t).unwrap_or(u64::MAX)).unwrap_or(false);
            if delivery_first {
                let Reverse(d) = self.deliveries.pop().unwrap();
                self.sims[d.node].now = self.now;
                self.nodes[d.node].on_physical_receive(&mut self.sims[d.node], d.link, &d.bytes);
                self.drain_outbox(d.node);
            } else if let Some((_, i)) = next_timer {
                let idx = self.sims[i].timers.iter().position(|t| t.time == time).unwrap();
                let timer = self.sims[i].timers.remove(idx);
                self.sims[i].now = self.now;
                self.nodes[i].on_timer(&mut self.sims[i], timer.kind, timer.data);
                self.drain_outbox(i);
            }
            processed += 1;
        }
        processed
    }

    pub fn received(&self, node: usize) -> &[(NodeAddr, Vec<u8>)] {
        &self.sims[node].received
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    /// Current simulated time, for scenarios that need to pin an absolute
    /// deadline relative to "now" rather than relative to zero.
    pub fn now(&self) -> u64 {
        self.now
    }
}
