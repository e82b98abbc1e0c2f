use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{DATAGRAM_HEADER_LEN, INITIAL_HOP_LIMIT};
use crate::error::WireError;

/// Network-layer header carried as a frame payload after link-layer reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub src: u8,
    pub dest: u8,
    pub hop_limit: u8,
    pub routing: bool,
}

impl DatagramHeader {
    /// A user-data datagram with the initial hop limit, as created by `network_transmit`.
    pub fn new_user_data(src: u8, dest: u8) -> Self {
        DatagramHeader {
            src,
            dest,
            hop_limit: INITIAL_HOP_LIMIT,
            routing: false,
        }
    }

    /// A routing-control datagram with the initial hop limit.
    pub fn new_routing(src: u8, dest: u8) -> Self {
        DatagramHeader {
            src,
            dest,
            hop_limit: INITIAL_HOP_LIMIT,
            routing: true,
        }
    }

    /// Decrements the hop limit, returning `None` once it reaches zero (drop).
    pub fn forwarded(mut self) -> Option<Self> {
        self.hop_limit = self.hop_limit.checked_sub(1)?;
        if self.hop_limit == 0 {
            None
        } else {
            Some(self)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub header: DatagramHeader,
    pub payload: Bytes,
}

impl Datagram {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATAGRAM_HEADER_LEN + self.payload.len());
        buf.put_u8(self.header.src);
        buf.put_u8(self.header.dest);
        buf.put_u8(self.header.hop_limit);
        buf.put_u8(self.header.routing as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Datagram, WireError> {
        if bytes.len() < DATAGRAM_HEADER_LEN {
            return Err(WireError::Truncated {
                kind: "datagram",
                len: bytes.len(),
                min: DATAGRAM_HEADER_LEN,
            });
        }
        let mut cursor = bytes;
        let src = cursor.get_u8();
        let dest = cursor.get_u8();
        let hop_limit = cursor.get_u8();
        let routing = cursor.get_u8() != 0;
        Ok(Datagram {
            header: DatagramHeader {
                src,
                dest,
                hop_limit,
                routing,
            },
            payload: Bytes::copy_from_slice(cursor),
        })
    }
}
