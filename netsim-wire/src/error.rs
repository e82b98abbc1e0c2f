use thiserror::Error;

/// Failures decoding a wire-format value from bytes handed up by a lower layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer of {len} bytes too short for a {kind} header of {min} bytes")]
    Truncated {
        kind: &'static str,
        len: usize,
        min: usize,
    },
    #[error("frame checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u16, computed: u16 },
    #[error("routing segment carries {count} distance entries, exceeding MAX_NEIGHBOURS")]
    TooManyDistanceEntries { count: usize },
    #[error("segment payload of {len} bytes exceeds SEGMENT_MAX_PAYLOAD")]
    SegmentPayloadTooLarge { len: usize },
}
