//! Read-through access to segment pointers.
//!
//! Pointers are owned by the metainfo store; the audit core only reads them,
//! evicts ones that have already expired, and issues a single conditional
//! piece-list update from the piece-hash verification path. Every conditional
//! operation uses the canonical encoded bytes of the pointer as its
//! precondition, so concurrent rewrites surface as [`MetainfoError::ValueChanged`]
//! instead of clobbering each other.

use crate::types::{NodeId, PieceId, SegmentKey};
use bytes::Bytes;
use std::{future::Future, time::SystemTime};
use thiserror::Error;

/// Errors surfaced by the metainfo store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetainfoError {
    /// The key does not exist (or no longer exists).
    #[error("segment not found")]
    NotFound,
    /// A conditional update lost its race: the stored bytes no longer match
    /// the precondition.
    #[error("segment value changed")]
    ValueChanged,
    /// The store could not be reached or failed internally.
    #[error("metainfo unavailable: {0}")]
    Unavailable(String),
}

/// Whether a segment's data is stored inline or on remote nodes.
///
/// Only remote segments are audited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerType {
    Inline,
    Remote,
}

/// Erasure-code geometry of a remote segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Redundancy {
    /// Shares needed to reconstruct a stripe (`k`).
    pub required: u16,
    /// Piece count at which the segment qualifies for repair (`r`).
    pub repair: u16,
    /// Piece count an upload aims for (`o`).
    pub optimal: u16,
    /// Total shares the code produces (`n`).
    pub total: u16,
    /// Bytes per erasure share (`s`).
    pub erasure_share_size: u32,
}

/// Error returned when a pointer carries an unusable redundancy scheme.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid redundancy scheme: {0:?}")]
pub struct InvalidRedundancy(pub Redundancy);

impl Redundancy {
    /// Checks `0 < k <= r <= o <= n` and `s > 0`.
    pub fn validate(&self) -> Result<(), InvalidRedundancy> {
        let ordered = 0 < self.required
            && self.required <= self.repair
            && self.repair <= self.optimal
            && self.optimal <= self.total;
        if !ordered || self.erasure_share_size == 0 {
            return Err(InvalidRedundancy(*self));
        }
        Ok(())
    }

    /// Bytes in one stripe: `k * s`.
    pub fn stripe_size(&self) -> u64 {
        self.required as u64 * self.erasure_share_size as u64
    }

    /// Number of whole stripes in a segment of `segment_size` bytes.
    pub fn stripes(&self, segment_size: u64) -> u64 {
        segment_size / self.stripe_size()
    }
}

/// One piece of a remote segment: which node holds which share.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemotePiece {
    /// The share index in the erasure code, unique within the pointer.
    pub piece_num: u32,
    /// The node that claims to hold it.
    pub node_id: NodeId,
}

/// The satellite's metadata record for one segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Pointer {
    pub creation_date: SystemTime,
    pub expiration_date: Option<SystemTime>,
    pub pointer_type: PointerType,
    pub segment_size: u64,
    /// Identifier the nodes derive their local piece ids from.
    pub root_piece_id: PieceId,
    pub redundancy: Redundancy,
    pub pieces: Vec<RemotePiece>,
    /// False until the satellite has proven the nodes for this segment hold
    /// correct data. While false, negative audit outcomes must not penalize
    /// nodes.
    pub piece_hashes_verified: bool,
}

impl Pointer {
    /// Whether the pointer's expiration, if any, has passed.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiration_date.is_some_and(|at| at < now)
    }

    /// The piece number the given node holds, if any.
    pub fn find_piece(&self, node_id: &NodeId) -> Option<u32> {
        self.pieces
            .iter()
            .find(|piece| piece.node_id == *node_id)
            .map(|piece| piece.piece_num)
    }
}

/// The metainfo store operations the audit core consumes.
pub trait Metainfo: Clone + Send + Sync + 'static {
    /// Fetches a pointer along with its canonical encoded bytes, for use as
    /// a compare-and-swap precondition.
    fn get_with_bytes(
        &self,
        key: &SegmentKey,
    ) -> impl Future<Output = Result<(Bytes, Pointer), MetainfoError>> + Send;

    /// Deletes a pointer if its bytes still match `prior_bytes`. Used only
    /// to evict already-expired pointers.
    fn delete(
        &self,
        key: &SegmentKey,
        prior_bytes: &Bytes,
    ) -> impl Future<Output = Result<(), MetainfoError>> + Send;

    /// Conditionally rewrites a pointer's piece list.
    ///
    /// Fails with [`MetainfoError::ValueChanged`] if the stored pointer no
    /// longer matches `prior`, and [`MetainfoError::NotFound`] if it is
    /// gone. `set_hashes_verified` additionally flips
    /// [`Pointer::piece_hashes_verified`] to true in the same write.
    #[allow(clippy::too_many_arguments)]
    fn update_pieces(
        &self,
        key: &SegmentKey,
        prior: &Pointer,
        to_add: Vec<RemotePiece>,
        to_remove: Vec<RemotePiece>,
        check_duplicates: bool,
        set_hashes_verified: bool,
    ) -> impl Future<Output = Result<(), MetainfoError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn redundancy() -> Redundancy {
        Redundancy {
            required: 4,
            repair: 5,
            optimal: 6,
            total: 6,
            erasure_share_size: 256,
        }
    }

    #[test]
    fn test_redundancy_validate() {
        assert!(redundancy().validate().is_ok());

        let mut zero_required = redundancy();
        zero_required.required = 0;
        assert!(zero_required.validate().is_err());

        let mut unordered = redundancy();
        unordered.repair = 3;
        assert!(unordered.validate().is_err());

        let mut zero_share = redundancy();
        zero_share.erasure_share_size = 0;
        assert!(zero_share.validate().is_err());
    }

    #[test]
    fn test_redundancy_stripes() {
        let r = redundancy();
        assert_eq!(r.stripe_size(), 1024);
        assert_eq!(r.stripes(1024), 1);
        assert_eq!(r.stripes(4096), 4);
        assert_eq!(r.stripes(1023), 0);
    }

    #[test]
    fn test_pointer_is_expired() {
        let now = SystemTime::now();
        let mut pointer = Pointer {
            creation_date: now,
            expiration_date: None,
            pointer_type: PointerType::Remote,
            segment_size: 1024,
            root_piece_id: crate::types::PieceId::from([0; 32]),
            redundancy: redundancy(),
            pieces: Vec::new(),
            piece_hashes_verified: true,
        };
        assert!(!pointer.is_expired(now));

        pointer.expiration_date = Some(now - Duration::from_secs(1));
        assert!(pointer.is_expired(now));

        pointer.expiration_date = Some(now + Duration::from_secs(60));
        assert!(!pointer.is_expired(now));
    }
}
