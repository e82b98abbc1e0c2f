use thiserror::Error;

use crate::sim::NodeAddr;

/// Errors surfaced by the node runtime. The great majority of failure modes
/// in this stack (corrupt frames, out-of-order fragments, duplicate
/// segments, hop-limit exhaustion) are handled silently per the
/// specification's error policy and never reach this type; these variants
/// cover the few conditions that are genuine bugs or misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// A destination has no forwarding-table entry after routing has had
    /// time to converge. Structural bug once steady state is reached;
    /// before convergence, traffic to ungated destinations never reaches
    /// this path because the routing layer hasn't called
    /// `enable_application` for it yet.
    #[error("no forwarding entry for destination {dest} after routing convergence")]
    UnreachableAfterConvergence { dest: NodeAddr },

    #[error("config error: {reason}")]
    InvalidConfig { reason: String },
}
