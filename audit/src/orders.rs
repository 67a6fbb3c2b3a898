//! Order limits: signed, short-lived download capabilities.
//!
//! The order service owns minting; it consults the overlay and refuses to
//! issue limits for nodes that are disqualified, gracefully exited, or
//! offline. The audit core only carries the resulting capabilities to the
//! nodes.

use crate::{
    metainfo::Pointer,
    types::{NodeId, NodeUrl, PieceId, PiecePrivateKey},
};
use std::{collections::HashSet, future::Future, net::SocketAddr};
use thiserror::Error;

/// Errors surfaced by the order service, including the overlay's typed
/// signals about the target node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// The node has been disqualified.
    #[error("node is disqualified")]
    NodeDisqualified,
    /// The node completed a graceful exit.
    #[error("node finished graceful exit")]
    NodeFinishedExit,
    /// The overlay considers the node offline.
    #[error("node is offline")]
    NodeOffline,
    /// The order service could not be reached or failed internally.
    #[error("order service unavailable: {0}")]
    Unavailable(String),
}

/// A signed capability authorizing a bounded read of one piece on one node.
#[derive(Clone, Debug)]
pub struct OrderLimit {
    /// Unique id of this limit.
    pub serial_number: [u8; 16],
    /// The node the limit is addressed to.
    pub node_id: NodeId,
    /// The piece the node may serve.
    pub piece_id: PieceId,
    /// Maximum number of bytes the node may serve under this limit.
    pub limit: u64,
}

/// An order limit bundled with the node's dial address.
#[derive(Clone, Debug)]
pub struct AddressedOrderLimit {
    pub limit: OrderLimit,
    pub address: SocketAddr,
}

impl AddressedOrderLimit {
    /// The dialable location of the limit's node.
    pub fn node_url(&self) -> NodeUrl {
        NodeUrl {
            id: self.limit.node_id,
            address: self.address,
        }
    }
}

/// The order-service operations the audit core consumes.
pub trait Orders: Clone + Send + Sync + 'static {
    /// Issues one download limit per piece of `pointer`, skipping nodes in
    /// `skip` and nodes the overlay considers unusable.
    ///
    /// The result is aligned to piece numbers; `None` marks an excluded
    /// node.
    fn create_audit_order_limits(
        &self,
        bucket: &[u8],
        pointer: &Pointer,
        skip: &HashSet<NodeId>,
    ) -> impl Future<Output = Result<(Vec<Option<AddressedOrderLimit>>, PiecePrivateKey), OrderError>> + Send;

    /// Issues a download limit for a single piece, for reverification.
    fn create_audit_order_limit(
        &self,
        bucket: &[u8],
        node_id: NodeId,
        piece_num: u32,
        piece_id: PieceId,
        share_size: u32,
    ) -> impl Future<Output = Result<(AddressedOrderLimit, PiecePrivateKey), OrderError>> + Send;
}
