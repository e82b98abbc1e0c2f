//! Wire formats for the simulated link, network, transport, and routing
//! layers: plain data plus exact bit-packed marshal/unmarshal, no behavior.
//!
//! Every header here is packed to the byte (and in places, the bit) to match
//! a fixed simulator wire contract, so encoding is hand-written against
//! `bytes::{Buf, BufMut}` rather than derived.

pub mod constants;
pub mod datagram;
pub mod error;
pub mod frame;
pub mod routing;
pub mod segment;

pub use datagram::{Datagram, DatagramHeader};
pub use error::WireError;
pub use frame::{Frame, FrameHeader};
pub use routing::{DistanceEntry, RoutingSegment, INFINITY};
pub use segment::{Segment, SegmentHeader};
