//! Network layer: datagram wrap/forward with hop-limit enforcement and a pure
//! forwarding-table lookup. No queuing happens at this layer — everything
//! that needs to wait does so in the link layer's output queue.

use netsim_wire::constants::INITIAL_HOP_LIMIT;
use netsim_wire::{Datagram, DatagramHeader};
use tracing::trace;

use crate::error::NodeError;
use crate::flat_map::FlatMap;
use crate::link::LinkLayer;
use crate::sim::{LinkIndex, NodeAddr, Simulator};

/// What a freshly-received, reassembled datagram turned out to be, for the
/// node runtime to dispatch to the right upper layer.
pub enum NetworkEvent {
    UserData { src: NodeAddr, payload: Vec<u8> },
    Routing { src: NodeAddr, payload: Vec<u8> },
}

pub struct NetworkLayer {
    address: NodeAddr,
    forwarding_table: FlatMap<NodeAddr, LinkIndex>,
}

impl NetworkLayer {
    pub fn new(address: NodeAddr) -> Self {
        NetworkLayer {
            address,
            forwarding_table: FlatMap::new(),
        }
    }

    /// Routing calls this whenever a destination's best link changes.
    pub fn set_route(&mut self, dest: NodeAddr, link: LinkIndex) {
        self.forwarding_table.insert(dest, link);
    }

    pub fn route(&self, dest: NodeAddr) -> Option<LinkIndex> {
        self.forwarding_table.get(&dest).copied()
    }

    /// `network_transmit(dest, bytes, size)`. The caller (transport) must not
    /// invoke this before routing has called `enable_application` for this
    /// destination; once routing has converged, a missing forwarding entry is
    /// a structural bug and is surfaced as [`NodeError::UnreachableAfterConvergence`]
    /// rather than silently dropped, per the specification's error policy.
    pub fn transmit(&mut self, sim: &mut dyn Simulator, links: &mut LinkLayer, dest: NodeAddr, bytes: &[u8]) -> Result<(), NodeError> {
        let link = self.route(dest).ok_or(NodeError::UnreachableAfterConvergence { dest })?;
        let datagram = Datagram {
            header: DatagramHeader {
                src: self.address,
                dest,
                hop_limit: INITIAL_HOP_LIMIT,
                routing: false,
            },
            payload: bytes::Bytes::copy_from_slice(bytes),
        };
        links.transmit(sim, link, &datagram.encode());
        Ok(())
    }

    /// Sends a routing-channel datagram directly to the neighbor reachable
    /// over `link`, bypassing the forwarding table (neighbors are always
    /// one hop away by definition).
    pub fn transmit_routing(&mut self, sim: &mut dyn Simulator, links: &mut LinkLayer, link: LinkIndex, neighbor: NodeAddr, bytes: &[u8]) {
        let datagram = Datagram {
            header: DatagramHeader {
                src: self.address,
                dest: neighbor,
                hop_limit: INITIAL_HOP_LIMIT,
                routing: true,
            },
            payload: bytes::Bytes::copy_from_slice(bytes),
        };
        links.transmit(sim, link, &datagram.encode());
    }

    /// `network_receive(link, bytes, size)`.
    pub fn receive(&mut self, sim: &mut dyn Simulator, links: &mut LinkLayer, link: LinkIndex, bytes: &[u8]) -> Option<NetworkEvent> {
        let datagram = Datagram::decode(bytes).ok()?;
        let forwarded = match datagram.header.forwarded() {
            Some(header) => header,
            None => {
                trace!(link, "network_receive dropped: hop limit exhausted");
                return None;
            }
        };

        if forwarded.routing {
            return Some(NetworkEvent::Routing {
                src: forwarded.src,
                payload: datagram.payload.to_vec(),
            });
        }

        if forwarded.dest == self.address {
            return Some(NetworkEvent::UserData {
                src: forwarded.src,
                payload: datagram.payload.to_vec(),
            });
        }

        // Forward: pure lookup, no queuing beyond the link layer's own.
        if let Some(out_link) = self.route(forwarded.dest) {
            let out = Datagram {
                header: forwarded,
                payload: datagram.payload,
            };
            links.transmit(sim, out_link, &out.encode());
        }
        None
    }
}
