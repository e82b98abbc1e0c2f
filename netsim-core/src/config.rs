//! Run-wide configuration: feature toggles plus link topology. Constructed
//! once at startup and immutable for the run, owned by the node runtime —
//! mirroring the teacher's single session-wide settings surface rather than
//! scattered global constants.

use serde::Deserialize;

use crate::error::NodeError;
use crate::sim::NodeAddr;

/// Boolean feature flags recognized by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Stagger new transport submissions rather than submit in a burst.
    pub use_gearing: bool,
    /// Send a naked ack when a receive produced no piggyback opportunity.
    pub explicit_ack: bool,
    /// Reno 3-duplicate-ack fast retransmit.
    pub use_reno: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            use_gearing: true,
            explicit_ack: true,
            use_reno: true,
        }
    }
}

/// Static per-link topology fact this node needs: the adjacent link's
/// bandwidth and MTU. In a live run these come from the simulator
/// (`Simulator::link_bandwidth`/`link_mtu`); this type exists so topology can
/// also be loaded from a config file for test harnesses and example binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkTopology {
    pub bandwidth: u32,
    pub mtu: usize,
}

/// Logging verbosity, deserializable from config; maps onto a `tracing::Level`
/// used to set the subscriber's max level. Does not gate individual call
/// sites — every structured log line in §6 of the specification is always
/// emitted, it's the subscriber that filters by this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogVerbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogVerbosity {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogVerbosity::Error => tracing::Level::ERROR,
            LogVerbosity::Warn => tracing::Level::WARN,
            LogVerbosity::Info => tracing::Level::INFO,
            LogVerbosity::Debug => tracing::Level::DEBUG,
            LogVerbosity::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for LogVerbosity {
    fn default() -> Self {
        LogVerbosity::Info
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub address: NodeAddr,
    pub links: Vec<LinkTopology>,
    #[serde(default)]
    pub flags: FeatureFlags,
    #[serde(default)]
    pub log_verbosity: LogVerbosity,
}

impl Config {
    /// Checked once at node startup. A link with zero bandwidth would make
    /// every pacing/load computation divide by zero; an MTU no larger than
    /// the frame header would leave no room for any payload byte.
    pub fn validate(&self) -> Result<(), NodeError> {
        for (i, link) in self.links.iter().enumerate() {
            if link.bandwidth == 0 {
                return Err(NodeError::InvalidConfig {
                    reason: format!("link {} has zero bandwidth", i + 1),
                });
            }
            if link.mtu <= netsim_wire::constants::FRAME_HEADER_LEN {
                return Err(NodeError::InvalidConfig {
                    reason: format!("link {} mtu {} leaves no room for frame payload", i + 1, link.mtu),
                });
            }
        }
        Ok(())
    }
}
