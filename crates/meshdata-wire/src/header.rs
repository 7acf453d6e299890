//! Fixed header for network data frames
//!
//! Fixed header is 12 bytes:
//! - Byte 0: Wire version
//! - Byte 1: Message kind
//! - Bytes 2-9: Sender node ID (LE)
//! - Bytes 10-11: Payload length (LE)

use bytes::{Buf, BufMut};
use meshdata_core::{MeshError, MeshResult, NodeId};

/// Fixed header size in bytes
pub const FIXED_HEADER_SIZE: usize = 12;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Message kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Delta = 0x01,
    SnapshotRequest = 0x02,
    Snapshot = 0x03,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> MeshResult<Self> {
        match b {
            0x01 => Ok(MessageKind::Delta),
            0x02 => Ok(MessageKind::SnapshotRequest),
            0x03 => Ok(MessageKind::Snapshot),
            other => Err(MeshError::UnknownMessageKind(other)),
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Fixed header structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedHeader {
    pub version: u8,
    pub kind: MessageKind,
    /// Node that put the frame on the link (not the data's author)
    pub sender: NodeId,
    pub payload_len: u16,
}

impl FixedHeader {
    pub fn new(kind: MessageKind, sender: NodeId) -> Self {
        FixedHeader {
            version: WIRE_VERSION,
            kind,
            sender,
            payload_len: 0,
        }
    }

    pub fn parse(buf: &mut impl Buf) -> MeshResult<Self> {
        if buf.remaining() < FIXED_HEADER_SIZE {
            return Err(MeshError::BufferTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: buf.remaining(),
            });
        }

        let version = buf.get_u8();
        if version != WIRE_VERSION {
            return Err(MeshError::InvalidWireFormat(format!(
                "unsupported wire version {}",
                version
            )));
        }
        let kind = MessageKind::from_byte(buf.get_u8())?;
        let sender = NodeId::new(buf.get_u64_le());
        let payload_len = buf.get_u16_le();

        Ok(FixedHeader {
            version,
            kind,
            sender,
            payload_len,
        })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.kind.to_byte());
        buf.put_u64_le(self.sender.0);
        buf.put_u16_le(self.payload_len);
    }
}
