//! Identifiers shared across the audit core.

use bytes::Bytes;
use std::{fmt, net::SocketAddr};
use thiserror::Error;

/// Renders bytes as lowercase hex.
pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Identity of a storage node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Byte length of a node id.
    pub const LENGTH: usize = 32;

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }
}

impl From<[u8; NodeId::LENGTH]> for NodeId {
    fn from(value: [u8; NodeId::LENGTH]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", hex(&self.0[..4]))
    }
}

/// Identifier the storage nodes use for the pieces of one segment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceId([u8; 32]);

impl PieceId {
    /// Byte length of a piece id.
    pub const LENGTH: usize = 32;

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }
}

impl From<[u8; PieceId::LENGTH]> for PieceId {
    fn from(value: [u8; PieceId::LENGTH]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for PieceId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

impl fmt::Debug for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceId({}..)", hex(&self.0[..4]))
    }
}

/// Secret authorizing use of a batch of order limits.
///
/// `Debug` is redacted so the secret cannot leak through logs.
#[derive(Clone)]
pub struct PiecePrivateKey([u8; 32]);

impl PiecePrivateKey {
    /// Byte length of the key.
    pub const LENGTH: usize = 32;

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }
}

impl From<[u8; PiecePrivateKey::LENGTH]> for PiecePrivateKey {
    fn from(value: [u8; PiecePrivateKey::LENGTH]) -> Self {
        Self(value)
    }
}

impl fmt::Debug for PiecePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PiecePrivateKey(..)")
    }
}

/// Opaque key identifying a segment in the metainfo store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentKey(Bytes);

impl SegmentKey {
    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for SegmentKey {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for SegmentKey {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into())
    }
}

impl From<&str> for SegmentKey {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentKey({self})")
    }
}

/// Error returned when a segment key does not carry the expected components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed segment key: {0}")]
pub struct InvalidSegmentKey(pub String);

/// The components encoded in a segment key:
/// `<project>/<segment-index>/<bucket>[/<object path>]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentLocation {
    project_id: Bytes,
    segment_index: Bytes,
    bucket: Bytes,
    object_path: Bytes,
}

impl SegmentLocation {
    /// Splits a segment key into its components.
    pub fn parse(key: &SegmentKey) -> Result<Self, InvalidSegmentKey> {
        let bytes = key.as_bytes();
        let mut parts = bytes.splitn(4, |&b| b == b'/');
        let project_id = parts.next().filter(|p| !p.is_empty());
        let segment_index = parts.next().filter(|p| !p.is_empty());
        let bucket = parts.next().filter(|p| !p.is_empty());
        match (project_id, segment_index, bucket) {
            (Some(project_id), Some(segment_index), Some(bucket)) => Ok(Self {
                project_id: Bytes::copy_from_slice(project_id),
                segment_index: Bytes::copy_from_slice(segment_index),
                bucket: Bytes::copy_from_slice(bucket),
                object_path: Bytes::copy_from_slice(parts.next().unwrap_or_default()),
            }),
            _ => Err(InvalidSegmentKey(key.to_string())),
        }
    }

    /// The project that owns the segment.
    pub fn project_id(&self) -> &[u8] {
        &self.project_id
    }

    /// The segment's index within its object (`l` for the last segment).
    pub fn segment_index(&self) -> &[u8] {
        &self.segment_index
    }

    /// The bucket the segment belongs to.
    pub fn bucket(&self) -> &[u8] {
        &self.bucket
    }

    /// The encrypted object path, possibly empty.
    pub fn object_path(&self) -> &[u8] {
        &self.object_path
    }
}

/// Dialable address of one storage node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeUrl {
    /// The node's identity.
    pub id: NodeId,
    /// Where the node listens.
    pub address: SocketAddr,
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}
