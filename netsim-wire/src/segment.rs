use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{MAX_SEGMENT_OFFSET, SEGMENT_HEADER_LEN, SEGMENT_MAX_PAYLOAD};
use crate::error::WireError;

const IS_LAST_BIT: u32 = MAX_SEGMENT_OFFSET; // bit 18

/// Transport-layer header: a cyclic offset (mod `MAX_SEGMENT_OFFSET`) with an
/// is-last flag packed into the bit immediately above the offset's range, and
/// the sender's current cumulative acknowledgment offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub offset: u32,
    pub is_last: bool,
    pub ack_offset: u32,
}

impl SegmentHeader {
    fn offset_is_last_word(self) -> u32 {
        debug_assert!(self.offset < MAX_SEGMENT_OFFSET);
        (self.offset % MAX_SEGMENT_OFFSET) | if self.is_last { IS_LAST_BIT } else { 0 }
    }

    fn from_offset_is_last_word(word: u32) -> Self {
        SegmentHeader {
            offset: word & (MAX_SEGMENT_OFFSET - 1),
            is_last: word & IS_LAST_BIT != 0,
            ack_offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Bytes,
}

impl Segment {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        if self.payload.len() > SEGMENT_MAX_PAYLOAD {
            return Err(WireError::SegmentPayloadTooLarge {
                len: self.payload.len(),
            });
        }
        let mut buf = BytesMut::with_capacity(SEGMENT_HEADER_LEN + self.payload.len());
        buf.put_u32(self.header.offset_is_last_word());
        buf.put_u32(self.header.ack_offset % MAX_SEGMENT_OFFSET);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    pub fn decode(bytes: &[u8]) -> Result<Segment, WireError> {
        if bytes.len() < SEGMENT_HEADER_LEN {
            return Err(WireError::Truncated {
                kind: "segment",
                len: bytes.len(),
                min: SEGMENT_HEADER_LEN,
            });
        }
        let mut cursor = bytes;
        let offset_is_last = cursor.get_u32();
        let ack_offset = cursor.get_u32();
        let mut header = SegmentHeader::from_offset_is_last_word(offset_is_last);
        header.ack_offset = ack_offset;
        Ok(Segment {
            header,
            payload: Bytes::copy_from_slice(cursor),
        })
    }
}
