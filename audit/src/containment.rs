//! The containment store: nodes that owe the satellite a reverification.
//!
//! A node is contained when a share download timed out after a successful
//! dial. The store keeps at most one [`PendingAudit`] per node; insertion is
//! performed by the caller that receives a [`crate::Report`], while the
//! reverifier reads and deletes entries as it settles them.

use crate::types::{NodeId, PieceId, SegmentKey};
use std::future::Future;
use thiserror::Error;

/// Errors surfaced by the containment store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainmentError {
    /// The node has no pending audit.
    #[error("pending audit not found")]
    NotFound,
    /// The store could not be reached or failed internally.
    #[error("containment unavailable: {0}")]
    Unavailable(String),
}

/// A commitment that a node must eventually prove it holds a specific share.
///
/// The hash was computed by re-encoding the share from the corrected stripe
/// while the first audit could still reconstruct it; reverification compares
/// the node's bytes against it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAudit {
    pub node_id: NodeId,
    /// Root piece id of the segment at the time of containment.
    pub piece_id: PieceId,
    pub stripe_index: u64,
    pub share_size: u32,
    /// SHA-256 of the canonical share the node is expected to serve.
    pub expected_share_hash: [u8; 32],
    /// Segment key at the time of containment. The segment may have been
    /// rewritten or deleted since.
    pub path: SegmentKey,
}

/// The containment-store operations the audit core consumes.
pub trait Containment: Clone + Send + Sync + 'static {
    /// Fetches the pending audit for a node, or
    /// [`ContainmentError::NotFound`].
    fn get(
        &self,
        node_id: &NodeId,
    ) -> impl Future<Output = Result<PendingAudit, ContainmentError>> + Send;

    /// Deletes the pending audit for a node. Idempotent; returns whether an
    /// entry was removed.
    fn delete(
        &self,
        node_id: &NodeId,
    ) -> impl Future<Output = Result<bool, ContainmentError>> + Send;
}
