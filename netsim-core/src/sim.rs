//! The external simulator boundary: timers, framed physical I/O, application
//! message I/O and flow control, node identity, and the clock. The core
//! never implements any of this itself — it only calls through this trait.

pub type TimerId = u64;
pub type NodeAddr = u8;
pub type LinkIndex = usize;

/// The four distinct timer kinds the core schedules. A `Simulator`
/// implementation need not distinguish them beyond firing the right
/// callback at the right time; the core uses the kind only for bookkeeping
/// and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Per-link pacing: spaces frame transmission by transmission delay.
    LinkPacing,
    /// Per-segment transport retransmit timer.
    TransportRetransmit,
    /// Per-routing-segment retransmit timer on a neighbor channel.
    RoutingRetransmit,
    /// Per-segment gearing (staggered submission) timer.
    Gearing,
}

/// Result of a physical-layer write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalStatus {
    Sent,
    Busy,
    NotReady,
}

/// Target of an application enable/disable call: one destination, or the
/// link layer's global "every destination" disable (`CNET_enable_application
/// (ALLNODES)` in the source this was distilled from).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppTarget {
    Node(NodeAddr),
    All,
}

pub trait Simulator {
    /// This node's own address.
    fn address(&self) -> NodeAddr;
    /// Number of physical links attached to this node, indexed `1..=num_links`.
    fn num_links(&self) -> usize;
    /// Current simulation time in microseconds.
    fn now_usec(&self) -> u64;

    fn link_bandwidth(&self, link: LinkIndex) -> u32;
    fn link_mtu(&self, link: LinkIndex) -> usize;

    /// Standard CRC-16, computed externally by the simulator.
    fn crc16(&self, bytes: &[u8]) -> u16;

    /// Non-blocking read of one pending outbound application message, if any.
    fn read_application(&mut self) -> Option<(NodeAddr, Vec<u8>)>;
    /// Delivers one received application message upward.
    fn write_application(&mut self, src: NodeAddr, data: &[u8]);
    fn enable_application(&mut self, target: AppTarget);
    fn disable_application(&mut self, target: AppTarget);

    /// Attempts to write one frame to the physical link. `Busy`/`NotReady`
    /// require the caller to retry after a short backoff.
    fn write_physical(&mut self, link: LinkIndex, data: &[u8]) -> PhysicalStatus;

    fn start_timer(&mut self, kind: TimerKind, usec: u64, data: u64) -> TimerId;
    fn stop_timer(&mut self, id: TimerId);
}
