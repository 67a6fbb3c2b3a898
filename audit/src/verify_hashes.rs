//! Reconciliation of segments with unvalidated piece commitments.
//!
//! Segments uploaded before hash validation existed carry
//! `piece_hashes_verified = false`: nothing proves their nodes ever held
//! correct data, so audits cannot penalize anyone. This path runs a full
//! verification, prunes the pointer down to the nodes that passed, and flips
//! the flag -- all under optimistic concurrency, since the pointer can be
//! rewritten at any time by uploads, repairs, or deletes.

use crate::{
    containment::Containment,
    metainfo::{Metainfo, MetainfoError, PointerType, RemotePiece},
    orders::Orders,
    pieces::PieceStore,
    types::{NodeId, SegmentKey},
    verifier::Verifier,
    Error,
};
use std::collections::HashSet;
use tracing::{info, warn};

/// Optimistic-concurrency retry budget for the pointer update.
const MAX_ATTEMPTS: usize = 3;

impl<M: Metainfo, O: Orders, C: Containment, P: PieceStore> Verifier<M, O, C, P> {
    /// Prunes a segment whose piece hashes were never validated down to the
    /// nodes a fresh audit proves honest, then marks the hashes verified.
    ///
    /// Returns whether the pointer was (or, for a dry run, would have been)
    /// changed. Segments that are missing, already verified, not remote, or
    /// not safely fixable are left alone. This is the only place the audit
    /// core mutates segment state.
    pub async fn verify_piece_hashes(&self, key: &SegmentKey, dry_run: bool) -> Result<bool, Error> {
        info!(segment = %key, "verifying piece hashes");

        for _ in 0..MAX_ATTEMPTS {
            let (_, pointer) = match self.metainfo.get_with_bytes(key).await {
                Ok(found) => found,
                Err(MetainfoError::NotFound) => {
                    info!(segment = %key, "segment not found");
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            };
            if pointer.piece_hashes_verified {
                info!(segment = %key, "piece hashes already verified");
                return Ok(false);
            }
            if pointer.pointer_type != PointerType::Remote {
                info!(segment = %key, "not a remote segment");
                return Ok(false);
            }

            // The reconciliation needs the negative verdicts the public
            // verify would erase for this very segment.
            let report = self.verify_inner(key, &HashSet::new(), false).await?;

            info!(
                successes = report.successes.len(),
                fails = report.fails.len(),
                offlines = report.offlines.len(),
                pending_audits = report.pending_audits.len(),
                unknown = report.unknown.len(),
                "audit report received"
            );

            if report.successes.is_empty() {
                // The segment may have been deleted or expired mid-audit.
                info!(segment = %key, "empty success list, skipping segment");
                return Ok(false);
            }
            if report.successes.len() < pointer.redundancy.required as usize {
                warn!(
                    successes = report.successes.len(),
                    required = pointer.redundancy.required,
                    "segment would be irreparable, not fixing it"
                );
                return Ok(false);
            }
            if report.successes.len() < pointer.redundancy.repair as usize {
                warn!(
                    successes = report.successes.len(),
                    repair_threshold = pointer.redundancy.repair,
                    "segment would require repair, not fixing it"
                );
                return Ok(false);
            }

            let expected = report.fails.len()
                + report.offlines.len()
                + report.pending_audits.len()
                + report.unknown.len();
            let successes: HashSet<NodeId> = report.successes.iter().copied().collect();
            let to_remove: Vec<RemotePiece> = pointer
                .pieces
                .iter()
                .filter(|piece| !successes.contains(&piece.node_id))
                .copied()
                .collect();
            if to_remove.len() != expected {
                return Err(Error::PieceCountMismatch {
                    got: to_remove.len(),
                    expected,
                });
            }

            info!(
                pieces = to_remove.len(),
                "removing unsuccessful pieces from pointer"
            );
            if dry_run {
                info!(
                    successes = report.successes.len(),
                    "dry run, skipping the actual fix"
                );
                return Ok(true);
            }

            match self
                .metainfo
                .update_pieces(key, &pointer, Vec::new(), to_remove, false, true)
                .await
            {
                Ok(()) => return Ok(true),
                Err(MetainfoError::ValueChanged) => {
                    info!(segment = %key, "race detected while modifying segment pointer, retrying");
                    continue;
                }
                Err(MetainfoError::NotFound) => {
                    info!(segment = %key, "segment not found");
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::UpdateAttemptsExhausted(MAX_ATTEMPTS))
    }
}
