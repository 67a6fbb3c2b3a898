//! Second chances for contained nodes.
//!
//! Containment is a fairness contract: a node that completed a dial must not
//! be failed for a slow read while the evidence is not yet cryptographic.
//! Reverification settles the debt by re-dialing only the suspect node and
//! comparing its bytes against the share hash committed when the node was
//! contained. Everything about the referenced segment may have changed since
//! -- it can be gone, expired, or rewritten -- and each of those resolves as
//! a skip, never as a verdict.

use crate::{
    containment::{Containment, ContainmentError, PendingAudit},
    metainfo::{Metainfo, MetainfoError},
    orders::{OrderError, Orders},
    pieces::{PieceError, PieceStore, Status, TransportError},
    report::Report,
    types::{hex, NodeId, SegmentKey, SegmentLocation},
    verifier::{check_segment_altered, get_share, DownloadBudget, Verifier},
    Error,
};
use futures::{channel::mpsc, SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::SystemTime,
};
use tracing::{debug, info, warn};

/// How one contained node's reverification settled.
enum Outcome {
    /// The pending audit no longer applies; the entry is deleted.
    Skipped,
    /// The node served bytes matching the committed hash.
    Success,
    /// The node could not be dialed.
    Offline,
    /// The node served wrong bytes or none at all.
    Failed,
    /// The node stalled again; the pending audit stands.
    Contained(PendingAudit),
    /// Transient failure, no verdict either way.
    Unknown,
    /// Environmental failure while settling this node.
    Erred(Error),
}

struct NodeResult {
    node_id: NodeId,
    outcome: Outcome,
}

impl<M: Metainfo, O: Orders, C: Containment, P: PieceStore> Verifier<M, O, C, P> {
    /// Reverifies every contained node holding a piece of the segment.
    ///
    /// Nodes without a pending audit are skipped. Per-node environmental
    /// failures are logged and counted but produce no verdict; the report
    /// remains authoritative for the nodes that did settle.
    pub async fn reverify(&self, key: &SegmentKey) -> Result<Report, Error> {
        let (pointer_bytes, pointer) = match self.metainfo.get_with_bytes(key).await {
            Ok(found) => found,
            Err(MetainfoError::NotFound) => {
                debug!(segment = %key, "segment deleted before reverify");
                return Ok(Report::default());
            }
            Err(err) => return Err(err.into()),
        };
        if pointer.is_expired(SystemTime::now()) {
            self.metainfo.delete(key, &pointer_bytes).await?;
            debug!(segment = %key, "segment expired before reverify");
            return Ok(Report::default());
        }

        // Written once per piece task; read again during post-processing to
        // strip verdicts for segments whose commitments were never
        // validated.
        let hashes_verified: Arc<Mutex<HashMap<NodeId, bool>>> = Arc::default();

        let piece_count = pointer.pieces.len();
        let (sender, mut receiver) = mpsc::channel(piece_count);
        let mut contained_in_segment = 0u64;

        for piece in &pointer.pieces {
            let pending = match self.containment.get(&piece.node_id).await {
                Ok(pending) => pending,
                Err(ContainmentError::NotFound) => {
                    let mut sender = sender.clone();
                    let _ = sender
                        .send(NodeResult {
                            node_id: piece.node_id,
                            outcome: Outcome::Skipped,
                        })
                        .await;
                    continue;
                }
                Err(err) => {
                    debug!(
                        node = %piece.node_id,
                        error = %err,
                        "reverify: error getting from containment store"
                    );
                    let mut sender = sender.clone();
                    let _ = sender
                        .send(NodeResult {
                            node_id: piece.node_id,
                            outcome: Outcome::Erred(err.into()),
                        })
                        .await;
                    continue;
                }
            };
            contained_in_segment += 1;

            let mut sender = sender.clone();
            let metainfo = self.metainfo.clone();
            let orders = self.orders.clone();
            let containment = self.containment.clone();
            let pieces = self.pieces.clone();
            let budget = self.budget;
            let hashes_verified = hashes_verified.clone();
            tokio::spawn(async move {
                let outcome = reverify_node(
                    &metainfo,
                    &orders,
                    &containment,
                    &pieces,
                    budget,
                    &pending,
                    &hashes_verified,
                )
                .await;
                let _ = sender
                    .send(NodeResult {
                        node_id: pending.node_id,
                        outcome,
                    })
                    .await;
            });
        }
        drop(sender);
        self.metrics.reverify_contained.inc_by(contained_in_segment);

        let mut report = Report::default();
        let mut errored = 0usize;
        let mut received = 0usize;
        while received < piece_count {
            let Some(result) = receiver.next().await else {
                break;
            };
            received += 1;
            match result.outcome {
                Outcome::Success => report.successes.push(result.node_id),
                Outcome::Offline => report.offlines.push(result.node_id),
                Outcome::Failed => report.fails.push(result.node_id),
                Outcome::Contained(pending) => report.pending_audits.push(pending),
                Outcome::Unknown => report.unknown.push(result.node_id),
                Outcome::Skipped => {
                    if let Err(err) = self.containment.delete(&result.node_id).await {
                        debug!(
                            node = %result.node_id,
                            error = %err,
                            "error deleting node from containment store"
                        );
                    }
                }
                Outcome::Erred(err) => {
                    warn!(
                        node = %result.node_id,
                        error = %err,
                        "reverify: settling node failed"
                    );
                    errored += 1;
                }
            }
        }

        // Strip negative verdicts for segments whose piece hashes were never
        // validated, and release those nodes from containment.
        let hashes_verified = hashes_verified.lock().unwrap().clone();
        let verified = |node_id: &NodeId| hashes_verified.get(node_id).copied().unwrap_or(false);

        let fails = std::mem::take(&mut report.fails);
        for node_id in fails {
            if verified(&node_id) {
                report.fails.push(node_id);
                continue;
            }
            if let Err(err) = self.containment.delete(&node_id).await {
                debug!(
                    node = %node_id,
                    error = %err,
                    "error deleting node from containment store"
                );
            }
        }
        let pending_audits = std::mem::take(&mut report.pending_audits);
        for pending in pending_audits {
            if verified(&pending.node_id) {
                report.pending_audits.push(pending);
                continue;
            }
            if let Err(err) = self.containment.delete(&pending.node_id).await {
                debug!(
                    node = %pending.node_id,
                    error = %err,
                    "error deleting node from containment store"
                );
            }
        }

        self.metrics
            .observe_reverify("success", report.successes.len());
        self.metrics.observe_reverify("fail", report.fails.len());
        self.metrics
            .observe_reverify("offline", report.offlines.len());
        self.metrics
            .observe_reverify("contained", report.pending_audits.len());
        self.metrics
            .observe_reverify("unknown", report.unknown.len());
        self.metrics.observe_reverify("error", errored);

        Ok(report)
    }
}

/// Settles one contained node against its pending audit.
async fn reverify_node<M: Metainfo, O: Orders, C: Containment, P: PieceStore>(
    metainfo: &M,
    orders: &O,
    containment: &C,
    pieces: &P,
    budget: DownloadBudget,
    pending: &PendingAudit,
    hashes_verified: &Mutex<HashMap<NodeId, bool>>,
) -> Outcome {
    let node_id = pending.node_id;

    // The pending audit references the segment as it was at containment
    // time, which may differ from the key being reverified now.
    let (pending_bytes, pending_pointer) = match metainfo.get_with_bytes(&pending.path).await {
        Ok(found) => found,
        Err(MetainfoError::NotFound) => {
            debug!(node = %node_id, "reverify: pending segment deleted");
            return Outcome::Skipped;
        }
        Err(err) => {
            debug!(
                node = %node_id,
                error = %err,
                "reverify: error getting pending pointer"
            );
            return Outcome::Erred(err.into());
        }
    };
    if pending_pointer.is_expired(SystemTime::now()) {
        if let Err(err) = metainfo.delete(&pending.path, &pending_bytes).await {
            debug!(
                node = %node_id,
                error = %err,
                "reverify: error deleting expired segment"
            );
        }
        debug!(node = %node_id, "reverify: segment already expired");
        return Outcome::Skipped;
    }

    hashes_verified
        .lock()
        .unwrap()
        .insert(node_id, pending_pointer.piece_hashes_verified);

    // The segment may have been re-uploaded under the same key with a new
    // root piece id, or repaired away from this node.
    if pending_pointer.root_piece_id != pending.piece_id {
        return Outcome::Skipped;
    }
    let Some(piece_num) = pending_pointer.find_piece(&node_id) else {
        return Outcome::Skipped;
    };
    let Ok(location) = SegmentLocation::parse(&pending.path) else {
        return Outcome::Skipped;
    };

    let (limit, piece_private_key) = match orders
        .create_audit_order_limit(
            location.bucket(),
            node_id,
            piece_num,
            pending.piece_id,
            pending.share_size,
        )
        .await
    {
        Ok(issued) => issued,
        Err(err @ OrderError::NodeDisqualified) => {
            if let Err(err) = containment.delete(&node_id).await {
                debug!(
                    node = %node_id,
                    error = %err,
                    "error deleting disqualified node from containment store"
                );
            }
            debug!(node = %node_id, "reverify: order limit not created (disqualified)");
            return Outcome::Erred(err.into());
        }
        Err(err @ OrderError::NodeFinishedExit) => {
            if let Err(err) = containment.delete(&node_id).await {
                debug!(
                    node = %node_id,
                    error = %err,
                    "error deleting exited node from containment store"
                );
            }
            debug!(node = %node_id, "reverify: order limit not created (graceful exit)");
            return Outcome::Erred(err.into());
        }
        Err(OrderError::NodeOffline) => {
            debug!(node = %node_id, "reverify: order limit not created (offline)");
            return Outcome::Offline;
        }
        Err(err) => {
            debug!(
                node = %node_id,
                error = %err,
                "reverify: error creating order limit"
            );
            return Outcome::Erred(err.into());
        }
    };

    let share = get_share(
        pieces,
        budget,
        &limit,
        &piece_private_key,
        pending.stripe_index,
        pending.share_size,
        piece_num,
    )
    .await;

    // The pending audit may have been settled by an operator or a
    // concurrent reverify while the download ran.
    match containment.get(&node_id).await {
        Ok(_) => {}
        Err(ContainmentError::NotFound) => {
            debug!(node = %node_id, "reverify: pending audit deleted during reverification");
            return Outcome::Skipped;
        }
        Err(err) => {
            debug!(
                node = %node_id,
                error = %err,
                "reverify: error getting from containment store"
            );
            return Outcome::Erred(err.into());
        }
    }

    if let Some(error) = share.error {
        return match error {
            PieceError::Transport(TransportError::Timeout) => {
                debug!(node = %node_id, error = %error, "reverify: dial timeout (offline)");
                Outcome::Offline
            }
            PieceError::Transport(TransportError::Dial(_)) => {
                debug!(node = %node_id, error = %error, "reverify: dial failed (offline)");
                Outcome::Offline
            }
            PieceError::Transport(_) => {
                info!(node = %node_id, error = %error, "reverify: unknown transport error (skipped)");
                Outcome::Unknown
            }
            PieceError::Status(Status::NotFound) => {
                // A rewritten segment explains the missing piece; only an
                // unchanged one convicts the node.
                match check_segment_altered(metainfo, &pending.path, &pending_pointer, &pending_bytes)
                    .await
                {
                    Ok(()) => {
                        info!(node = %node_id, error = %error, "reverify: piece not found (audit failed)");
                        Outcome::Failed
                    }
                    Err(_) => {
                        debug!(node = %node_id, "reverify: audit source changed before reverification");
                        Outcome::Skipped
                    }
                }
            }
            PieceError::Status(Status::DeadlineExceeded) => {
                info!(node = %node_id, error = %error, "reverify: download timeout (contained)");
                Outcome::Contained(pending.clone())
            }
            PieceError::Status(_) => {
                info!(node = %node_id, error = %error, "reverify: unknown error (skipped)");
                Outcome::Unknown
            }
        };
    }

    let downloaded_hash: [u8; 32] = Sha256::digest(&share.data).into();
    if downloaded_hash == pending.expected_share_hash {
        info!(node = %node_id, "reverify: hashes match (audit success)");
        return Outcome::Success;
    }
    match check_segment_altered(metainfo, &pending.path, &pending_pointer, &pending_bytes).await {
        Ok(()) => {
            info!(
                node = %node_id,
                expected = %hex(&pending.expected_share_hash),
                downloaded = %hex(&downloaded_hash),
                "reverify: hashes mismatch (audit failed)"
            );
            Outcome::Failed
        }
        Err(_) => {
            debug!(node = %node_id, "reverify: audit source changed before reverification");
            Outcome::Skipped
        }
    }
}
