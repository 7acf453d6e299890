//! Complete frame structure for network data propagation
//!
//! Frame = Fixed Header + Message Payload
//!
//! All integers are little-endian. Prefixes are encoded as
//! `value:u128 | len:u8`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use meshdata_core::{
    ContextEntry, ContextId, DataVersion, Ipv6Prefix, MeshError, MeshResult, NodeId, PrefixEntry,
    PrefixFlags,
};
use meshdata_state::{Delta, NetworkData};

use crate::{FixedHeader, MessageKind, FIXED_HEADER_SIZE};

/// Maximum frame size (IPv6 minimum MTU)
pub const MAX_FRAME_SIZE: usize = 1280;

const PREFIX_SIZE: usize = 17;
const PREFIX_ENTRY_SIZE: usize = PREFIX_SIZE + 1 + 8;
const CONTEXT_ENTRY_SIZE: usize = 1 + PREFIX_SIZE + 1;

/// Live contexts (one prefix each) that still fit one frame, both as a
/// snapshot and as a jump delta replacing every prefix and context
pub const MAX_CONTEXTS_PER_FRAME: usize = max_contexts_per_frame();

const fn max_contexts_per_frame() -> usize {
    let budget = MAX_FRAME_SIZE - FIXED_HEADER_SIZE;
    let snapshot = (budget - 8 - 2 * 2) / (PREFIX_ENTRY_SIZE + CONTEXT_ENTRY_SIZE);
    let jump = (budget - 2 * 8 - 4 * 2)
        / (PREFIX_ENTRY_SIZE + PREFIX_SIZE + CONTEXT_ENTRY_SIZE + 1);
    if snapshot < jump {
        snapshot
    } else {
        jump
    }
}

/// Propagation messages
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Delta(Delta),
    /// Ask a neighbor for its full network data if newer than `have`
    SnapshotRequest { have: DataVersion },
    Snapshot(NetworkData),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Delta(_) => MessageKind::Delta,
            Message::SnapshotRequest { .. } => MessageKind::SnapshotRequest,
            Message::Snapshot(_) => MessageKind::Snapshot,
        }
    }
}

/// Complete frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FixedHeader,
    pub message: Message,
}

impl Frame {
    pub fn new(sender: NodeId, message: Message) -> Self {
        Frame {
            header: FixedHeader::new(message.kind(), sender),
            message,
        }
    }

    #[inline]
    pub fn sender(&self) -> NodeId {
        self.header.sender
    }

    /// Serialize frame to bytes
    pub fn serialize(&self) -> MeshResult<Bytes> {
        let mut payload = BytesMut::new();
        match &self.message {
            Message::Delta(delta) => encode_delta(delta, &mut payload)?,
            Message::SnapshotRequest { have } => payload.put_u64_le(have.0),
            Message::Snapshot(data) => encode_snapshot(data, &mut payload)?,
        }

        let total_size = FIXED_HEADER_SIZE + payload.len();
        if total_size > MAX_FRAME_SIZE {
            return Err(MeshError::InvalidWireFormat(format!(
                "Frame too large: {} > {}",
                total_size, MAX_FRAME_SIZE
            )));
        }

        let mut header = self.header.clone();
        header.kind = self.message.kind();
        header.payload_len = payload.len() as u16;

        let mut buf = BytesMut::with_capacity(total_size);
        header.serialize(&mut buf);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Parse frame from bytes
    pub fn parse(buf: &[u8]) -> MeshResult<Self> {
        let mut buf = buf;
        let header = FixedHeader::parse(&mut buf)?;
        if buf.remaining() != header.payload_len as usize {
            return Err(MeshError::InvalidWireFormat(format!(
                "payload length {} does not match {} remaining bytes",
                header.payload_len,
                buf.remaining()
            )));
        }

        let message = match header.kind {
            MessageKind::Delta => Message::Delta(decode_delta(&mut buf)?),
            MessageKind::SnapshotRequest => {
                need(&buf, 8)?;
                Message::SnapshotRequest {
                    have: DataVersion::new(buf.get_u64_le()),
                }
            }
            MessageKind::Snapshot => Message::Snapshot(decode_snapshot(&mut buf)?),
        };

        if buf.has_remaining() {
            return Err(MeshError::InvalidWireFormat(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(Frame { header, message })
    }
}

fn need(buf: &impl Buf, expected: usize) -> MeshResult<()> {
    if buf.remaining() < expected {
        return Err(MeshError::BufferTooShort {
            expected,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn put_count(buf: &mut BytesMut, count: usize) -> MeshResult<()> {
    let count = u16::try_from(count)
        .map_err(|_| MeshError::InvalidWireFormat(format!("too many entries: {}", count)))?;
    buf.put_u16_le(count);
    Ok(())
}

fn get_count(buf: &mut impl Buf, entry_size: usize) -> MeshResult<usize> {
    need(&*buf, 2)?;
    let count = buf.get_u16_le() as usize;
    need(&*buf, count * entry_size)?;
    Ok(count)
}

fn put_prefix(buf: &mut BytesMut, prefix: &Ipv6Prefix) {
    buf.put_u128_le(prefix.value());
    buf.put_u8(prefix.len());
}

fn get_prefix(buf: &mut impl Buf) -> MeshResult<Ipv6Prefix> {
    let value = buf.get_u128_le();
    let len = buf.get_u8();
    Ipv6Prefix::new(value, len)
}

fn put_prefix_entry(buf: &mut BytesMut, entry: &PrefixEntry) {
    put_prefix(buf, &entry.prefix);
    buf.put_u8(entry.flags.into());
    buf.put_u64_le(entry.owner.0);
}

fn get_prefix_entry(buf: &mut impl Buf) -> MeshResult<PrefixEntry> {
    let prefix = get_prefix(buf)?;
    let flags = PrefixFlags::from(buf.get_u8());
    let owner = NodeId::new(buf.get_u64_le());
    Ok(PrefixEntry::new(prefix, flags, owner))
}

fn put_context_entry(buf: &mut BytesMut, entry: &ContextEntry) {
    buf.put_u8(entry.id.value());
    put_prefix(buf, &entry.prefix);
    buf.put_u8(entry.compress as u8);
}

fn get_context_entry(buf: &mut impl Buf) -> MeshResult<ContextEntry> {
    let id = ContextId::new(buf.get_u8());
    let prefix = get_prefix(buf)?;
    let compress = buf.get_u8() != 0;
    Ok(ContextEntry {
        id,
        prefix,
        compress,
    })
}

fn encode_delta(delta: &Delta, buf: &mut BytesMut) -> MeshResult<()> {
    buf.put_u64_le(delta.from_version.0);
    buf.put_u64_le(delta.to_version.0);

    put_count(buf, delta.prefixes_added.len())?;
    for entry in &delta.prefixes_added {
        put_prefix_entry(buf, entry);
    }
    put_count(buf, delta.prefixes_removed.len())?;
    for prefix in &delta.prefixes_removed {
        put_prefix(buf, prefix);
    }
    put_count(buf, delta.contexts_added.len())?;
    for entry in &delta.contexts_added {
        put_context_entry(buf, entry);
    }
    put_count(buf, delta.contexts_removed.len())?;
    for id in &delta.contexts_removed {
        buf.put_u8(id.value());
    }
    Ok(())
}

fn decode_delta(buf: &mut impl Buf) -> MeshResult<Delta> {
    need(&*buf, 16)?;
    let from_version = DataVersion::new(buf.get_u64_le());
    let to_version = DataVersion::new(buf.get_u64_le());
    if to_version <= from_version {
        return Err(MeshError::InvalidWireFormat(format!(
            "delta does not advance: {:?} -> {:?}",
            from_version, to_version
        )));
    }

    let count = get_count(buf, PREFIX_ENTRY_SIZE)?;
    let prefixes_added = (0..count)
        .map(|_| get_prefix_entry(buf))
        .collect::<MeshResult<Vec<_>>>()?;

    let count = get_count(buf, PREFIX_SIZE)?;
    let prefixes_removed = (0..count)
        .map(|_| get_prefix(buf))
        .collect::<MeshResult<Vec<_>>>()?;

    let count = get_count(buf, CONTEXT_ENTRY_SIZE)?;
    let contexts_added = (0..count)
        .map(|_| get_context_entry(buf))
        .collect::<MeshResult<Vec<_>>>()?;

    let count = get_count(buf, 1)?;
    let contexts_removed = (0..count).map(|_| ContextId::new(buf.get_u8())).collect();

    Ok(Delta {
        from_version,
        to_version,
        prefixes_added,
        prefixes_removed,
        contexts_added,
        contexts_removed,
    })
}

fn encode_snapshot(data: &NetworkData, buf: &mut BytesMut) -> MeshResult<()> {
    buf.put_u64_le(data.version.0);
    put_count(buf, data.prefix_count())?;
    for entry in data.prefixes() {
        put_prefix_entry(buf, entry);
    }
    put_count(buf, data.context_count())?;
    for entry in data.contexts() {
        put_context_entry(buf, entry);
    }
    Ok(())
}

fn decode_snapshot(buf: &mut impl Buf) -> MeshResult<NetworkData> {
    need(&*buf, 8)?;
    let version = DataVersion::new(buf.get_u64_le());

    let count = get_count(buf, PREFIX_ENTRY_SIZE)?;
    let prefixes = (0..count)
        .map(|_| get_prefix_entry(buf))
        .collect::<MeshResult<Vec<_>>>()?;

    let count = get_count(buf, CONTEXT_ENTRY_SIZE)?;
    let contexts = (0..count)
        .map(|_| get_context_entry(buf))
        .collect::<MeshResult<Vec<_>>>()?;

    Ok(NetworkData::from_parts(version, prefixes, contexts))
}
