use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::FRAME_HEADER_LEN;
use crate::error::WireError;

/// Link-layer header: a 7-bit datagram id shared by every fragment of one
/// datagram, an is-last flag, and the 0-based fragment ordering index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub id: u8,
    pub is_last: bool,
    pub ordering: u8,
}

impl FrameHeader {
    fn id_is_last_byte(self) -> u8 {
        (self.id & 0x7f) | if self.is_last { 0x80 } else { 0 }
    }

    fn from_id_is_last_byte(byte: u8) -> Self {
        FrameHeader {
            id: byte & 0x7f,
            is_last: byte & 0x80 != 0,
            ordering: 0,
        }
    }
}

/// A complete link-layer frame: header plus opaque fragment payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Marshals the frame, computing the CRC over the whole buffer with the
    /// checksum field zeroed, then patching it back in. `crc16` is the
    /// simulator-provided checksum function; this crate never computes CRC
    /// itself (see the simulator boundary in the core crate).
    pub fn encode(&self, crc16: impl FnOnce(&[u8]) -> u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u16(0);
        buf.put_u8(self.header.id_is_last_byte());
        buf.put_u8(self.header.ordering);
        buf.put_slice(&self.payload);

        let checksum = crc16(&buf);
        buf[0..2].copy_from_slice(&checksum.to_be_bytes());
        buf.freeze()
    }

    /// Validates the CRC (recomputed with the checksum field zeroed) and
    /// decodes the header and payload. A checksum mismatch is the only
    /// decode failure; callers treat it as "mark the datagram corrupt, drop
    /// the frame" per the link layer's error policy.
    pub fn decode(bytes: &[u8], crc16: impl FnOnce(&[u8]) -> u16) -> Result<Frame, WireError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(WireError::Truncated {
                kind: "frame",
                len: bytes.len(),
                min: FRAME_HEADER_LEN,
            });
        }

        let expected = u16::from_be_bytes([bytes[0], bytes[1]]);
        let mut zeroed = BytesMut::from(bytes);
        zeroed[0] = 0;
        zeroed[1] = 0;
        let computed = crc16(&zeroed);
        if computed != expected {
            return Err(WireError::ChecksumMismatch { expected, computed });
        }

        let mut cursor = &bytes[2..];
        let id_is_last = cursor.get_u8();
        let ordering = cursor.get_u8();
        let mut header = FrameHeader::from_id_is_last_byte(id_is_last);
        header.ordering = ordering;

        Ok(Frame {
            header,
            payload: Bytes::copy_from_slice(cursor),
        })
    }
}
