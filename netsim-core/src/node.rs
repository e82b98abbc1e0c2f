//! Per-node runtime: the "glue" that wires simulator events to each layer's
//! entry points (§2's "Glue" component). Owns every layer's state for one
//! node; every event callback borrows it rather than reaching into
//! process-wide singletons, per §9's guidance on cyclic-graph state.

use crate::config::Config;
use crate::link::LinkLayer;
use crate::network::{NetworkEvent, NetworkLayer};
use crate::routing::RoutingLayer;
use crate::transport::{decode_gearing_data, TransportLayer};
use crate::sim::{LinkIndex, NodeAddr, Simulator, TimerKind};

/// Owns link, network/routing, and transport state for one node. Created
/// once in the reboot/init handler and threaded through every subsequent
/// event by reference.
pub struct Node {
    links: LinkLayer,
    network: NetworkLayer,
    routing: RoutingLayer,
    transport: TransportLayer,
}

impl Node {
    /// `link_init()` + `network_init()` (which in turn runs routing init,
    /// broadcasting this node's own initial distance entry) + `transport_init()`,
    /// in that order, matching §4's component init sequence.
    pub fn new(
        sim: &mut dyn Simulator,
        config: &Config,
        neighbor_of: impl Fn(LinkIndex) -> NodeAddr,
    ) -> Self {
        config.validate().expect("invalid node configuration");
        let mut links = LinkLayer::new(config.links.len(), |link| {
            let topo = config.links[link - 1];
            (topo.bandwidth, topo.mtu)
        });
        let mut network = NetworkLayer::new(config.address);
        let routing = RoutingLayer::new(sim, &mut network, &mut links, neighbor_of);
        let transport = TransportLayer::new(config.flags);
        Node {
            links,
            network,
            routing,
            transport,
        }
    }

    /// The application has a message ready to send to `dest`.
    pub fn send(&mut self, sim: &mut dyn Simulator, dest: NodeAddr, bytes: &[u8]) {
        self.transport
            .transmit(sim, &mut self.network, &mut self.links, dest, bytes);
    }

    /// A frame arrived on `link` from the physical layer. Drives it up
    /// through link reassembly, network forwarding/local-delivery, and (for
    /// local, non-routing datagrams) transport.
    pub fn on_physical_receive(&mut self, sim: &mut dyn Simulator, link: LinkIndex, bytes: &[u8]) {
        let Some(datagram_bytes) = self.links.receive(sim, link, bytes) else {
            return;
        };
        let Some(event) = self
            .network
            .receive(sim, &mut self.links, link, &datagram_bytes)
        else {
            return;
        };
        match event {
            NetworkEvent::UserData { src, payload } => {
                self.transport
                    .receive(sim, &mut self.network, &mut self.links, src, &payload);
            }
            NetworkEvent::Routing { payload, .. } => {
                // Routing-adjacent datagrams always arrive from a directly
                // connected neighbor, so the incoming physical link index
                // (not the decoded source address) identifies the channel.
                self.routing
                    .receive(sim, &mut self.network, &mut self.links, link, &payload);
            }
        }
    }

    /// A previously scheduled timer fired; dispatch to the owning layer.
    pub fn on_timer(&mut self, sim: &mut dyn Simulator, kind: TimerKind, data: u64) {
        match kind {
            TimerKind::LinkPacing => {
                self.links.on_pacing_timer(sim, data as LinkIndex);
            }
            TimerKind::RoutingRetransmit => {
                self.routing
                    .on_retransmit_timer(sim, &mut self.network, &mut self.links, data as LinkIndex);
            }
            TimerKind::TransportRetransmit => {
                let (dest, offset) = decode_gearing_data(data);
                self.transport
                    .on_retransmit_timer(sim, &mut self.network, &mut self.links, dest, offset);
            }
            TimerKind::Gearing => {
                let (dest, offset) = decode_gearing_data(data);
                self.transport
                    .on_gearing_timer(sim, &mut self.network, &mut self.links, dest, offset);
            }
        }
    }

    // -- Introspection, mirroring §4.3's link accessors and used by tests. --

    pub fn num_links(&self) -> usize {
        self.links.num_links()
    }

    pub fn link_bandwidth(&self, link: LinkIndex) -> u32 {
        self.links.bandwidth(link)
    }

    pub fn link_mtu(&self, link: LinkIndex) -> usize {
        self.links.mtu(link)
    }

    pub fn link_queue_size(&self, link: LinkIndex) -> usize {
        self.links.queue_size(link)
    }

    pub fn link_load(&self, link: LinkIndex, now: u64) -> f64 {
        self.links.load(link, now)
    }

    pub fn link_utilization(&self, link: LinkIndex, now: u64) -> f64 {
        self.links.utilization(link, now)
    }

    pub fn forwarding_route(&self, dest: NodeAddr) -> Option<LinkIndex> {
        self.network.route(dest)
    }

    pub fn routing_in_flight(&self, link: LinkIndex) -> usize {
        self.routing.in_flight_count(link)
    }

    pub fn window_size(&self, peer: NodeAddr) -> Option<u32> {
        self.transport.window_size(peer)
    }

    pub fn estimated_rtt_usec(&self, peer: NodeAddr) -> Option<f64> {
        self.transport.estimated_rtt_usec(peer)
    }

    pub fn outbound_len(&self, peer: NodeAddr) -> Option<usize> {
        self.transport.outbound_len(peer)
    }
}
