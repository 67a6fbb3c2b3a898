//! The storage-node piece download protocol, as the audit core sees it.
//!
//! Nodes are dialed per audit; a connection serves authenticated range reads
//! of one piece and closes when dropped. Errors keep the transport and
//! application layers apart because the verifier's verdicts depend on the
//! distinction: a node that never completed a dial is offline, while a node
//! that dialed and then stalled is contained.

use crate::{
    orders::OrderLimit,
    types::{NodeUrl, PiecePrivateKey},
};
use bytes::Bytes;
use std::{fmt, future::Future};
use thiserror::Error;

/// Application status codes a node can answer a download with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The node does not hold the requested piece.
    NotFound,
    /// The download ran past its deadline after a successful dial.
    DeadlineExceeded,
    /// The order limit was rejected.
    Unauthorized,
    /// The node failed internally.
    Internal,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Unauthorized => "unauthorized",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Transport-layer failures: the dial or the byte stream broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The per-share budget elapsed before the dial completed.
    #[error("timed out")]
    Timeout,
    /// The node could not be reached.
    #[error("dial failed: {0}")]
    Dial(String),
    /// An established connection failed mid-stream.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Any failure of a piece download.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PieceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("node returned status: {0}")]
    Status(Status),
}

/// Dials storage nodes for piece downloads.
pub trait PieceStore: Clone + Send + Sync + 'static {
    /// An established connection to one node. Dropped connections are
    /// closed; there is no explicit close.
    type Connection: PieceConnection;

    /// Dials the node at `target`.
    fn dial(
        &self,
        target: &NodeUrl,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// An established piece-download connection to one node.
pub trait PieceConnection: Send {
    /// Reads exactly `length` bytes of the limit's piece starting at
    /// `offset`. Short reads are reported as errors by the caller.
    fn download(
        &mut self,
        limit: &OrderLimit,
        piece_private_key: &PiecePrivateKey,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<Bytes, PieceError>> + Send;
}
