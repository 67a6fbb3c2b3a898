//! Audit verification core of a distributed object-storage satellite.
//!
//! The satellite coordinates erasure-coded segments stored across an
//! untrusted fleet of storage nodes. This crate periodically samples a random
//! stripe of a segment, re-downloads the corresponding erasure shares from
//! the nodes that claim to hold them, and determines cryptographically which
//! nodes still hold correct data. Its outputs -- per-node verdicts of
//! success, failure, offline, unknown, or contained (awaiting
//! reverification) -- drive reputation, suspension, disqualification, and
//! repair decisions elsewhere in the system.
//!
//! Three operations make up the surface:
//!
//! - [`Verifier::verify`] audits one segment end to end and emits a
//!   [`Report`].
//! - [`Verifier::reverify`] gives previously contained nodes their second
//!   chance against the share hash committed at containment time.
//! - [`Verifier::verify_piece_hashes`] reconciles a segment whose piece
//!   commitments were never validated down to a provably-honest piece set.
//!
//! External collaborators -- the metainfo store, the order service, the
//! containment store, and the storage-node download protocol -- are consumed
//! through the traits in [`metainfo`], [`orders`], [`containment`], and
//! [`pieces`]. In-memory implementations for tests live in [`mocks`].

pub mod containment;
pub mod metainfo;
pub mod metrics;
pub mod mocks;
pub mod orders;
pub mod pieces;
pub mod report;
pub mod types;

mod reverifier;
#[cfg(test)]
mod testutil;
mod verifier;
mod verify_hashes;

pub use report::Report;
pub use verifier::{Config, Share, Verifier};

use thiserror::Error;

/// Errors surfaced by the audit operations.
///
/// Race outcomes (segment deleted, expired, or rewritten mid-flight) are
/// absorbed internally and returned as empty reports, not errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer shares downloaded than the erasure code needs. Carries the
    /// partial report so offline/unknown bookkeeping can still proceed.
    #[error("not enough shares for successful audit: got {got}, required {required}")]
    NotEnoughShares {
        got: usize,
        required: usize,
        report: Report,
    },
    /// The audited segment disappeared mid-flight.
    #[error("segment deleted during audit")]
    SegmentDeleted,
    /// The audited segment was rewritten mid-flight.
    #[error("segment has been modified")]
    SegmentModified,
    /// Only remote segments can be audited.
    #[error("segment is not remote")]
    NotRemote,
    #[error(transparent)]
    Key(#[from] types::InvalidSegmentKey),
    #[error(transparent)]
    Redundancy(#[from] metainfo::InvalidRedundancy),
    #[error("metainfo: {0}")]
    Metainfo(#[from] metainfo::MetainfoError),
    #[error("orders: {0}")]
    Orders(#[from] orders::OrderError),
    #[error("containment: {0}")]
    Containment(#[from] containment::ContainmentError),
    #[error("erasure coding: {0}")]
    Coding(#[from] satellite_fec::Error),
    /// The piece-hash verification sanity check tripped: the pointer's
    /// unsuccessful pieces do not line up with the report.
    #[error("pieces to remove ({got}) do not match unsuccessful nodes ({expected})")]
    PieceCountMismatch { got: usize, expected: usize },
    /// Piece-hash verification lost every optimistic-concurrency race.
    #[error("failed to update segment pointer in {0} attempts")]
    UpdateAttemptsExhausted(usize),
}
