//! Aggregate audit verdicts.

use crate::{containment::PendingAudit, types::NodeId};

/// Per-node verdicts of one audit.
///
/// The sets are disjoint: every audited node lands in exactly one. Nodes
/// in `pending_audits` are newly contained; the caller is responsible for
/// inserting them into the containment store.
#[derive(Clone, Debug, Default)]
pub struct Report {
    /// Nodes that served bytes matching the erasure code.
    pub successes: Vec<NodeId>,
    /// Nodes proven to hold wrong or missing data.
    pub fails: Vec<NodeId>,
    /// Nodes that could not be dialed.
    pub offlines: Vec<NodeId>,
    /// Nodes that dialed but timed out mid-download, now owing a
    /// reverification.
    pub pending_audits: Vec<PendingAudit>,
    /// Nodes with no verdict either way (transient errors).
    pub unknown: Vec<NodeId>,
}

impl Report {
    /// Total number of nodes the audit reached a conclusion about.
    pub fn total(&self) -> usize {
        self.successes.len()
            + self.fails.len()
            + self.offlines.len()
            + self.pending_audits.len()
            + self.unknown.len()
    }

    /// Whether the audit produced no verdicts at all.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
