//! Sizes and limits shared by every wire format in this crate.

/// Upper bound on a connection's cyclic offset space. Offsets are always
/// reduced modulo this value before storage or comparison.
pub const MAX_SEGMENT_OFFSET: u32 = 1 << 18;

/// Widest span of offsets that may be in flight at once. The double-ring
/// wrap-safe ordering scheme requires `MAX_SEGMENT_OFFSET >= 2 * MAX_WINDOW_OFFSET`.
pub const MAX_WINDOW_OFFSET: u32 = (MAX_WINDOW_SIZE as u32) * (SEGMENT_MAX_PAYLOAD as u32);

/// Largest number of in-flight transport segments a connection permits.
pub const MAX_WINDOW_SIZE: u16 = 32;

/// Largest payload carried by a single transport segment.
pub const SEGMENT_MAX_PAYLOAD: usize = 1024;

/// Largest number of distance entries carried by one routing segment.
pub const MAX_NEIGHBOURS: usize = 100;

/// Initial hop limit stamped on every datagram sent by this node.
pub const INITIAL_HOP_LIMIT: u8 = 32;

pub const FRAME_HEADER_LEN: usize = 4;
pub const DATAGRAM_HEADER_LEN: usize = 4;
pub const SEGMENT_HEADER_LEN: usize = 8;
pub const ROUTING_HEADER_LEN: usize = 4;
pub const DISTANCE_ENTRY_LEN: usize = 16;

const _: () = assert!(MAX_SEGMENT_OFFSET as u64 >= 2 * MAX_WINDOW_OFFSET as u64);
