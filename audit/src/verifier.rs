//! One-shot audit of a single segment.
//!
//! A verification downloads one randomly chosen stripe's worth of erasure
//! shares from every node named in the segment's pointer, checks the shares
//! against the erasure code, and classifies every node into exactly one
//! verdict. Nodes that dialed but stalled mid-download are not failed
//! outright: they are handed back as pending audits, to be settled by
//! reverification against a hash committed while the stripe could still be
//! reconstructed.

use crate::{
    containment::{Containment, PendingAudit},
    metainfo::{Metainfo, MetainfoError, Pointer, PointerType},
    metrics::Metrics,
    orders::{AddressedOrderLimit, Orders},
    pieces::{PieceConnection, PieceError, PieceStore, Status, TransportError},
    report::Report,
    types::{NodeId, PiecePrivateKey, SegmentKey, SegmentLocation},
    Error,
};
use bytes::Bytes;
use futures::{channel::mpsc, SinkExt, StreamExt};
use prometheus_client::registry::Registry;
use rand::{rngs::OsRng, Rng};
use satellite_fec as fec;
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tokio::time::Instant;
use tracing::{debug, info};

/// One erasure share downloaded (or attempted) from one node.
#[derive(Clone, Debug)]
pub struct Share {
    /// The share's index in the erasure code.
    pub piece_num: u32,
    /// The node that served (or failed to serve) it.
    pub node_id: NodeId,
    /// Exactly one share of bytes on success, empty otherwise.
    pub data: Bytes,
    /// Why the download failed, if it did.
    pub error: Option<PieceError>,
}

/// Configuration for [`Verifier`].
#[derive(Clone)]
pub struct Config {
    /// Registry the audit metrics are registered on.
    pub registry: Arc<Mutex<Registry>>,
    /// Throughput floor assumed when budgeting a share download. Zero
    /// disables download budgets entirely.
    pub min_bytes_per_second: u64,
    /// Minimum budget for one share download, regardless of share size.
    pub min_download_timeout: Duration,
}

/// The per-share download budget: `max(min_download_timeout, size / rate)`,
/// spanning dial plus read.
#[derive(Clone, Copy)]
pub(crate) struct DownloadBudget {
    min_bytes_per_second: u64,
    min_download_timeout: Duration,
}

impl DownloadBudget {
    pub(crate) fn deadline(&self, share_size: u32) -> Option<Instant> {
        if self.min_bytes_per_second == 0 {
            return None;
        }
        let transfer = Duration::from_nanos(
            1_000_000_000u64.saturating_mul(share_size as u64) / self.min_bytes_per_second,
        );
        Some(Instant::now() + transfer.max(self.min_download_timeout))
    }
}

/// Audits segments for data correctness.
pub struct Verifier<M: Metainfo, O: Orders, C: Containment, P: PieceStore> {
    pub(crate) metainfo: M,
    pub(crate) orders: O,
    pub(crate) containment: C,
    pub(crate) pieces: P,
    pub(crate) budget: DownloadBudget,
    pub(crate) metrics: Metrics,
}

impl<M: Metainfo, O: Orders, C: Containment, P: PieceStore> Verifier<M, O, C, P> {
    /// Creates a verifier over the given collaborators.
    pub fn new(config: Config, metainfo: M, orders: O, containment: C, pieces: P) -> Self {
        Self {
            metainfo,
            orders,
            containment,
            pieces,
            budget: DownloadBudget {
                min_bytes_per_second: config.min_bytes_per_second,
                min_download_timeout: config.min_download_timeout,
            },
            metrics: Metrics::new(&config.registry),
        }
    }

    /// Downloads shares of a random stripe and verifies their correctness.
    ///
    /// Nodes in `skip` are not audited. Segments that were deleted, expired,
    /// or rewritten while the audit ran yield an empty report, not an error.
    pub async fn verify(&self, key: &SegmentKey, skip: &HashSet<NodeId>) -> Result<Report, Error> {
        self.verify_inner(key, skip, true).await
    }

    /// Like [`Verifier::verify`], but `filter_unverified` controls whether
    /// negative verdicts are erased for segments whose piece hashes were
    /// never validated. Piece-hash reconciliation needs them intact.
    pub(crate) async fn verify_inner(
        &self,
        key: &SegmentKey,
        skip: &HashSet<NodeId>,
        filter_unverified: bool,
    ) -> Result<Report, Error> {
        let (pointer_bytes, pointer) = match self.metainfo.get_with_bytes(key).await {
            Ok(found) => found,
            Err(MetainfoError::NotFound) => {
                debug!(segment = %key, "segment deleted before verify");
                return Ok(Report::default());
            }
            Err(err) => return Err(err.into()),
        };
        if pointer.is_expired(SystemTime::now()) {
            self.metainfo.delete(key, &pointer_bytes).await?;
            debug!(segment = %key, "segment expired before verify");
            return Ok(Report::default());
        }
        if pointer.pointer_type != PointerType::Remote {
            return Err(Error::NotRemote);
        }
        pointer.redundancy.validate()?;

        // A segment whose piece commitments were never validated must not be
        // used to penalize nodes; the first audit's job is reconciliation.
        let hashes_verified = pointer.piece_hashes_verified;
        let finish = move |mut report: Report| {
            if filter_unverified && !hashes_verified {
                report.fails = Vec::new();
                report.pending_audits = Vec::new();
            }
            report
        };

        let stripe_index = random_stripe(&pointer);
        let share_size = pointer.redundancy.erasure_share_size;
        let location = SegmentLocation::parse(key)?;

        let (order_limits, piece_private_key) = self
            .orders
            .create_audit_order_limits(location.bucket(), &pointer, skip)
            .await?;

        // Pieces with neither a limit nor a skip entry belong to nodes the
        // order service could not use, disqualified ones included.
        let mut offline_nodes = offline_nodes(&pointer, &order_limits, skip);
        if !offline_nodes.is_empty() {
            debug!(
                segment = %key,
                piece_hashes_verified = hashes_verified,
                nodes = ?offline_nodes,
                "order limits not created for some nodes (offline/disqualified)"
            );
        }

        let shares = self
            .download_shares(&order_limits, &piece_private_key, stripe_index, share_size)
            .await;

        // A legitimate rewrite mid-download must not be blamed on the nodes.
        if let Err(err) =
            check_segment_altered(&self.metainfo, key, &pointer, &pointer_bytes).await
        {
            match err {
                Error::SegmentDeleted => {
                    debug!(segment = %key, "segment deleted during verify");
                    return Ok(Report::default());
                }
                Error::SegmentModified => {
                    debug!(segment = %key, "segment modified during verify");
                    return Ok(Report::default());
                }
                err => return Err(err),
            }
        }

        let mut failed_nodes = Vec::new();
        let mut unknown_nodes = Vec::new();
        let mut contained_nodes: HashMap<u32, NodeId> = HashMap::new();
        let mut shares_to_audit: HashMap<u32, Share> = HashMap::new();

        for (piece_num, share) in &shares {
            let Some(error) = &share.error else {
                shares_to_audit.insert(*piece_num, share.clone());
                continue;
            };
            match error {
                PieceError::Transport(TransportError::Timeout) => {
                    offline_nodes.push(share.node_id);
                    debug!(
                        node = %share.node_id,
                        piece_hashes_verified = hashes_verified,
                        error = %error,
                        "verify: dial timeout (offline)"
                    );
                }
                PieceError::Transport(TransportError::Dial(_)) => {
                    offline_nodes.push(share.node_id);
                    debug!(
                        node = %share.node_id,
                        piece_hashes_verified = hashes_verified,
                        error = %error,
                        "verify: dial failed (offline)"
                    );
                }
                PieceError::Transport(_) => {
                    unknown_nodes.push(share.node_id);
                    info!(
                        node = %share.node_id,
                        piece_hashes_verified = hashes_verified,
                        error = %error,
                        "verify: unknown transport error (skipped)"
                    );
                }
                PieceError::Status(Status::NotFound) => {
                    failed_nodes.push(share.node_id);
                    info!(
                        node = %share.node_id,
                        piece_hashes_verified = hashes_verified,
                        error = %error,
                        "verify: piece not found (audit failed)"
                    );
                }
                PieceError::Status(Status::DeadlineExceeded) => {
                    contained_nodes.insert(*piece_num, share.node_id);
                    info!(
                        node = %share.node_id,
                        piece_hashes_verified = hashes_verified,
                        error = %error,
                        "verify: download timeout (contained)"
                    );
                }
                PieceError::Status(_) => {
                    unknown_nodes.push(share.node_id);
                    info!(
                        node = %share.node_id,
                        piece_hashes_verified = hashes_verified,
                        error = %error,
                        "verify: unknown error (skipped)"
                    );
                }
            }
        }

        self.metrics
            .shares_downloaded
            .inc_by(shares_to_audit.len() as u64);

        let required = pointer.redundancy.required as usize;
        let total = pointer.redundancy.total as usize;

        if shares_to_audit.len() < required {
            self.metrics.not_enough_shares.inc();
            let report = finish(Report {
                fails: failed_nodes,
                offlines: offline_nodes,
                unknown: unknown_nodes,
                ..Report::default()
            });
            return Err(Error::NotEnoughShares {
                got: shares_to_audit.len(),
                required,
                report,
            });
        }

        let (altered_pieces, corrected_shares) = audit_shares(required, total, &shares_to_audit)?;
        for piece_num in altered_pieces {
            let node_id = shares[&piece_num].node_id;
            failed_nodes.push(node_id);
            info!(
                node = %node_id,
                piece_hashes_verified = hashes_verified,
                piece_num,
                "verify: share altered (audit failed)"
            );
        }

        let success_nodes = success_nodes(
            &shares,
            &failed_nodes,
            &offline_nodes,
            &unknown_nodes,
            &contained_nodes,
        );

        self.metrics.observe_verify("success", success_nodes.len());
        self.metrics.observe_verify("fail", failed_nodes.len());
        self.metrics.observe_verify("offline", offline_nodes.len());
        self.metrics
            .observe_verify("contained", contained_nodes.len());
        self.metrics.observe_verify("unknown", unknown_nodes.len());

        let pending_audits = create_pending_audits(
            &contained_nodes,
            &corrected_shares,
            &pointer,
            stripe_index,
            key,
        )?;

        Ok(finish(Report {
            successes: success_nodes,
            fails: failed_nodes,
            offlines: offline_nodes,
            pending_audits,
            unknown: unknown_nodes,
        }))
    }

    /// Downloads one share per issued order limit, all concurrently.
    ///
    /// Every launched task reports exactly one [`Share`] through a channel
    /// bounded at `limits.len()`; the map is complete once each has
    /// reported. A task that dies without reporting closes its channel
    /// slot, so collection can never hang on it.
    pub(crate) async fn download_shares(
        &self,
        limits: &[Option<AddressedOrderLimit>],
        piece_private_key: &PiecePrivateKey,
        stripe_index: u64,
        share_size: u32,
    ) -> HashMap<u32, Share> {
        let (sender, mut receiver) = mpsc::channel(limits.len());
        let mut launched = 0usize;
        for (piece_num, limit) in limits.iter().enumerate() {
            let Some(limit) = limit.clone() else {
                continue;
            };
            launched += 1;
            let mut sender = sender.clone();
            let pieces = self.pieces.clone();
            let piece_private_key = piece_private_key.clone();
            let budget = self.budget;
            tokio::spawn(async move {
                let share = get_share(
                    &pieces,
                    budget,
                    &limit,
                    &piece_private_key,
                    stripe_index,
                    share_size,
                    piece_num as u32,
                )
                .await;
                let _ = sender.send(share).await;
            });
        }
        drop(sender);

        let mut shares = HashMap::with_capacity(launched);
        while shares.len() < launched {
            match receiver.next().await {
                Some(share) => {
                    shares.insert(share.piece_num, share);
                }
                None => break,
            }
        }
        shares
    }
}

/// Checks whether the pointer changed since the audit sampled it.
///
/// The byte image is the canonical witness; the creation date is checked as
/// well because a rewrite that reuses the key always refreshes it.
pub(crate) async fn check_segment_altered<M: Metainfo>(
    metainfo: &M,
    key: &SegmentKey,
    old_pointer: &Pointer,
    old_bytes: &Bytes,
) -> Result<(), Error> {
    let (new_bytes, new_pointer) = match metainfo.get_with_bytes(key).await {
        Ok(found) => found,
        Err(MetainfoError::NotFound) => return Err(Error::SegmentDeleted),
        Err(err) => return Err(err.into()),
    };
    if old_pointer.creation_date != new_pointer.creation_date || *old_bytes != new_bytes {
        return Err(Error::SegmentModified);
    }
    Ok(())
}

/// Downloads one share from one node under the per-share budget.
pub(crate) async fn get_share<P: PieceStore>(
    pieces: &P,
    budget: DownloadBudget,
    limit: &AddressedOrderLimit,
    piece_private_key: &PiecePrivateKey,
    stripe_index: u64,
    share_size: u32,
    piece_num: u32,
) -> Share {
    let node_id = limit.limit.node_id;
    let fail = |error: PieceError| Share {
        piece_num,
        node_id,
        data: Bytes::new(),
        error: Some(error),
    };

    // One deadline spans dial and read. Running out during the dial means
    // the node is unreachable; running out after a successful dial is the
    // node's own slowness and maps to its deadline status.
    let deadline = budget.deadline(share_size);

    let target = limit.node_url();
    let mut connection = match with_deadline(deadline, pieces.dial(&target)).await {
        Ok(Ok(connection)) => connection,
        Ok(Err(err)) => return fail(err.into()),
        Err(_) => return fail(TransportError::Timeout.into()),
    };

    let offset = share_size as u64 * stripe_index;
    let download = connection.download(
        &limit.limit,
        piece_private_key,
        offset,
        share_size as u64,
    );
    let data = match with_deadline(deadline, download).await {
        Ok(Ok(data)) => data,
        Ok(Err(err)) => return fail(err),
        Err(_) => return fail(PieceError::Status(Status::DeadlineExceeded)),
    };
    if data.len() != share_size as usize {
        return fail(
            TransportError::Connection(format!(
                "short read: {} of {} bytes",
                data.len(),
                share_size
            ))
            .into(),
        );
    }

    Share {
        piece_num,
        node_id,
        data,
        error: None,
    }
}

/// Runs `future` against an optional deadline.
async fn with_deadline<F: Future>(
    deadline: Option<Instant>,
    future: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, future).await,
        None => Ok(future.await),
    }
}

/// Picks the stripe to audit.
///
/// The draw must come from an OS-level cryptographic source: a fleet that
/// can predict which stripe will be audited only has to keep those bytes.
fn random_stripe(pointer: &Pointer) -> u64 {
    // The last segment of an object can be smaller than one stripe.
    let stripes = pointer.redundancy.stripes(pointer.segment_size);
    if stripes == 0 {
        return 0;
    }
    OsRng.gen_range(0..stripes)
}

/// Pieces whose node has neither an order limit nor a skip entry.
fn offline_nodes(
    pointer: &Pointer,
    limits: &[Option<AddressedOrderLimit>],
    skip: &HashSet<NodeId>,
) -> Vec<NodeId> {
    let with_limit: HashSet<NodeId> = limits
        .iter()
        .flatten()
        .map(|limit| limit.limit.node_id)
        .collect();
    pointer
        .pieces
        .iter()
        .filter(|piece| !with_limit.contains(&piece.node_id) && !skip.contains(&piece.node_id))
        .map(|piece| piece.node_id)
        .collect()
}

/// Runs the erasure code's correction over the downloaded shares.
///
/// Returns the piece numbers whose bytes the correction had to change --
/// the audit-failure set -- along with the corrected shares. The downloaded
/// originals are left untouched; the correction works on copies.
fn audit_shares(
    required: usize,
    total: usize,
    originals: &HashMap<u32, Share>,
) -> Result<(Vec<u32>, Vec<fec::Share>), fec::Error> {
    let fec = fec::Fec::new(required, total)?;
    let mut copies: Vec<fec::Share> = originals
        .values()
        .map(|share| fec::Share {
            number: share.piece_num as usize,
            data: share.data.to_vec(),
        })
        .collect();
    fec.correct(&mut copies)?;

    let mut altered = Vec::new();
    for copy in &copies {
        if originals[&(copy.number as u32)].data.as_ref() != copy.data.as_slice() {
            altered.push(copy.number as u32);
        }
    }
    Ok((altered, copies))
}

/// Nodes that served a share and ended up in no negative set.
fn success_nodes(
    shares: &HashMap<u32, Share>,
    failed: &[NodeId],
    offline: &[NodeId],
    unknown: &[NodeId],
    contained: &HashMap<u32, NodeId>,
) -> Vec<NodeId> {
    let mut excluded: HashSet<NodeId> = failed
        .iter()
        .chain(offline)
        .chain(unknown)
        .copied()
        .collect();
    excluded.extend(contained.values().copied());

    shares
        .values()
        .filter(|share| !excluded.contains(&share.node_id))
        .map(|share| share.node_id)
        .collect()
}

/// Commits each contained node to the share it should have served.
///
/// The expected hash is derived by re-encoding the node's share from the
/// corrected stripe, so reverification later has cryptographic evidence to
/// compare against.
fn create_pending_audits(
    contained: &HashMap<u32, NodeId>,
    corrected_shares: &[fec::Share],
    pointer: &Pointer,
    stripe_index: u64,
    key: &SegmentKey,
) -> Result<Vec<PendingAudit>, Error> {
    if contained.is_empty() {
        return Ok(Vec::new());
    }

    let required = pointer.redundancy.required as usize;
    let total = pointer.redundancy.total as usize;
    let share_size = pointer.redundancy.erasure_share_size as usize;
    let fec = fec::Fec::new(required, total)?;
    let stripe = rebuild_stripe(&fec, corrected_shares, share_size)?;

    let mut pending = Vec::with_capacity(contained.len());
    let mut share = vec![0u8; share_size];
    for (&piece_num, &node_id) in contained {
        fec.encode_single(&stripe, &mut share, piece_num as usize)?;
        pending.push(PendingAudit {
            node_id,
            piece_id: pointer.root_piece_id,
            stripe_index,
            share_size: share_size as u32,
            expected_share_hash: Sha256::digest(&share).into(),
            path: key.clone(),
        });
    }
    Ok(pending)
}

/// Reassembles the raw stripe from corrected shares.
fn rebuild_stripe(
    fec: &fec::Fec,
    corrected_shares: &[fec::Share],
    share_size: usize,
) -> Result<Vec<u8>, fec::Error> {
    let mut stripe = vec![0u8; fec.required() * share_size];
    fec.rebuild(corrected_shares, |number, data| {
        stripe[number * share_size..][..share_size].copy_from_slice(data);
    })?;
    Ok(stripe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::NodeBehavior,
        testutil::{
            assert_same_nodes, harness, segment_key, setup_segment, REQUIRED, SHARE_SIZE,
        },
    };
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn test_verify_all_honest() {
        let harness = harness();
        let segment = setup_segment(&harness, "honest", true);

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();

        assert_same_nodes(&report.successes, &segment.nodes);
        assert!(report.fails.is_empty());
        assert!(report.offlines.is_empty());
        assert!(report.pending_audits.is_empty());
        assert!(report.unknown.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_one_corrupt_node() {
        let harness = harness();
        let segment = setup_segment(&harness, "corrupt", true);
        let corrupt = segment.nodes[2];
        harness
            .pieces
            .corrupt_node(corrupt, Bytes::from(vec![0xFF; SHARE_SIZE as usize]));

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(report.fails, vec![corrupt]);
        let honest: Vec<NodeId> = segment
            .nodes
            .iter()
            .copied()
            .filter(|node| *node != corrupt)
            .collect();
        assert_same_nodes(&report.successes, &honest);
        assert!(report.offlines.is_empty());
        assert!(report.pending_audits.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_dial_and_download_timeouts() {
        let harness = harness();
        let segment = setup_segment(&harness, "timeouts", true);
        let dial_hang = segment.nodes[0];
        let download_hang = segment.nodes[1];
        harness.pieces.set_node(dial_hang, NodeBehavior::DialHang);
        harness
            .pieces
            .set_node(download_hang, NodeBehavior::DownloadHang);

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(report.offlines, vec![dial_hang]);
        assert_eq!(report.pending_audits.len(), 1);
        let pending = &report.pending_audits[0];
        assert_eq!(pending.node_id, download_hang);
        assert_eq!(pending.stripe_index, 0);
        assert_eq!(pending.share_size, SHARE_SIZE);
        assert_eq!(pending.expected_share_hash, segment.expected_hash(1));
        assert_eq!(pending.path, segment.key);
        assert_same_nodes(&report.successes, &segment.nodes[2..]);
        assert!(report.fails.is_empty());
        assert!(report.unknown.is_empty());

        // Every audited node lands in exactly one set.
        let mut all: Vec<NodeId> = report.successes.clone();
        all.extend(&report.offlines);
        all.extend(report.pending_audits.iter().map(|pending| pending.node_id));
        assert_same_nodes(&all, &segment.nodes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_not_enough_shares() {
        let harness = harness();
        let segment = setup_segment(&harness, "offline", true);
        for node in &segment.nodes[..3] {
            harness.pieces.set_node(*node, NodeBehavior::DialRefused);
        }

        let err = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap_err();

        let Error::NotEnoughShares {
            got,
            required,
            report,
        } = err
        else {
            panic!("expected NotEnoughShares");
        };
        assert_eq!(got, 3);
        assert_eq!(required, REQUIRED as usize);
        assert_same_nodes(&report.offlines, &segment.nodes[..3]);
        assert!(report.successes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_segment_deleted_before_audit() {
        let harness = harness();
        let report = harness
            .verifier
            .verify(&segment_key("missing"), &HashSet::new())
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_segment_deleted_mid_audit() {
        let harness = harness();
        let segment = setup_segment(&harness, "deleted", true);
        // Survive the initial read, vanish before the tamper check.
        harness.metainfo.remove_after_reads(segment.key.clone(), 1);

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_segment_modified_mid_audit() {
        let harness = harness();
        let segment = setup_segment(&harness, "modified", true);
        harness
            .metainfo
            .mutate_after_reads(segment.key.clone(), 1, |pointer| {
                pointer.pieces.rotate_left(1);
            });

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_expired_segment_is_evicted() {
        let harness = harness();
        let segment = setup_segment(&harness, "expired", true);
        harness.metainfo.update(&segment.key, |pointer| {
            pointer.expiration_date = Some(SystemTime::now() - StdDuration::from_secs(60));
        });

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert!(harness.metainfo.pointer(&segment.key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_unverified_hashes_erase_negative_verdicts() {
        let harness = harness();
        let segment = setup_segment(&harness, "unverified", false);
        let corrupt = segment.nodes[2];
        harness
            .pieces
            .corrupt_node(corrupt, Bytes::from(vec![0xFF; SHARE_SIZE as usize]));

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();

        assert!(report.fails.is_empty());
        assert!(report.pending_audits.is_empty());
        let honest: Vec<NodeId> = segment
            .nodes
            .iter()
            .copied()
            .filter(|node| *node != corrupt)
            .collect();
        assert_same_nodes(&report.successes, &honest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_skips_requested_nodes() {
        let harness = harness();
        let segment = setup_segment(&harness, "skip", true);
        let skipped = segment.nodes[0];
        let skip: HashSet<NodeId> = [skipped].into_iter().collect();

        let report = harness.verifier.verify(&segment.key, &skip).await.unwrap();

        assert_same_nodes(&report.successes, &segment.nodes[1..]);
        assert!(report.offlines.is_empty());
        assert!(report.fails.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_unknown_transport_error() {
        let harness = harness();
        let segment = setup_segment(&harness, "unknown", true);
        let flaky = segment.nodes[5];
        harness.pieces.set_node(flaky, NodeBehavior::BreakConnection);

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(report.unknown, vec![flaky]);
        assert_same_nodes(&report.successes, &segment.nodes[..5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_not_found_is_a_failure() {
        let harness = harness();
        let segment = setup_segment(&harness, "notfound", true);
        let missing = segment.nodes[4];
        harness
            .pieces
            .set_node(missing, NodeBehavior::Respond(Status::NotFound));

        let report = harness
            .verifier
            .verify(&segment.key, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(report.fails, vec![missing]);
        let honest: Vec<NodeId> = segment
            .nodes
            .iter()
            .copied()
            .filter(|node| *node != missing)
            .collect();
        assert_same_nodes(&report.successes, &honest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_budget() {
        let floored = DownloadBudget {
            min_bytes_per_second: 128 * 1024,
            min_download_timeout: Duration::from_secs(5),
        };
        let now = Instant::now();
        assert_eq!(floored.deadline(SHARE_SIZE), Some(now + Duration::from_secs(5)));

        let throughput_bound = DownloadBudget {
            min_bytes_per_second: 1,
            min_download_timeout: Duration::from_secs(5),
        };
        assert_eq!(
            throughput_bound.deadline(10),
            Some(now + Duration::from_secs(10))
        );

        let disabled = DownloadBudget {
            min_bytes_per_second: 0,
            min_download_timeout: Duration::from_secs(5),
        };
        assert_eq!(disabled.deadline(SHARE_SIZE), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_stripe_small_segment() {
        let harness = harness();
        let segment = setup_segment(&harness, "small", true);
        let mut pointer = harness.metainfo.pointer(&segment.key).unwrap();
        pointer.segment_size = SHARE_SIZE as u64; // smaller than one stripe
        assert_eq!(random_stripe(&pointer), 0);

        pointer.segment_size = crate::testutil::SEGMENT_SIZE;
        assert_eq!(random_stripe(&pointer), 0); // exactly one stripe
    }
}
