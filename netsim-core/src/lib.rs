//! Link, network/routing, and transport layers for a simulated multi-hop
//! mesh network, atop a pluggable [`sim::Simulator`] boundary.
//!
//! [`node::Node`] is the crate's single entry point: one value per
//! simulated node, created once at startup and driven by three kinds of
//! events from the simulator (application sends, physical-layer receives,
//! timer fires), dispatching each into the layer it belongs to.

pub mod bitset;
pub mod config;
pub mod cyclic_buffer;
pub mod dring;
pub mod error;
pub mod flat_map;
pub mod link;
pub mod network;
pub mod node;
pub mod routing;
pub mod sim;
pub mod squeue;
pub mod transport;

pub use config::{Config, FeatureFlags, LinkTopology, LogVerbosity};
pub use error::NodeError;
pub use node::Node;
pub use sim::{AppTarget, LinkIndex, NodeAddr, PhysicalStatus, Simulator, TimerId, TimerKind};
