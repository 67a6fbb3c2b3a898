//! Shared fixtures for audit tests.

use crate::{
    containment::PendingAudit,
    metainfo::{Pointer, PointerType, Redundancy, RemotePiece},
    mocks::{
        InMemoryContainment, InMemoryMetainfo, InMemoryOrders, LoopbackPieceStore, NodeBehavior,
    },
    types::{NodeId, PieceId, SegmentKey},
    verifier::{Config, Verifier},
};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use satellite_fec as fec;
use sha2::{Digest, Sha256};
use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

pub(crate) const REQUIRED: u16 = 4;
pub(crate) const REPAIR: u16 = 4;
pub(crate) const TOTAL: u16 = 6;
pub(crate) const SHARE_SIZE: u32 = 256;
pub(crate) const SEGMENT_SIZE: u64 = REQUIRED as u64 * SHARE_SIZE as u64;

pub(crate) type TestVerifier =
    Verifier<InMemoryMetainfo, InMemoryOrders, InMemoryContainment, LoopbackPieceStore>;

pub(crate) struct Harness {
    pub metainfo: InMemoryMetainfo,
    pub orders: InMemoryOrders,
    pub containment: InMemoryContainment,
    pub pieces: LoopbackPieceStore,
    pub verifier: TestVerifier,
}

pub(crate) fn harness() -> Harness {
    let metainfo = InMemoryMetainfo::default();
    let orders = InMemoryOrders::default();
    let containment = InMemoryContainment::default();
    let pieces = LoopbackPieceStore::default();
    let verifier = Verifier::new(
        Config {
            registry: Arc::new(Mutex::new(Registry::default())),
            min_bytes_per_second: 128 * 1024,
            min_download_timeout: Duration::from_secs(5),
        },
        metainfo.clone(),
        orders.clone(),
        containment.clone(),
        pieces.clone(),
    );
    Harness {
        metainfo,
        orders,
        containment,
        pieces,
        verifier,
    }
}

pub(crate) fn node_id(n: u8) -> NodeId {
    NodeId::from([n; 32])
}

pub(crate) fn segment_key(name: &str) -> SegmentKey {
    SegmentKey::from(format!("project/l/bucket/{name}").as_str())
}

/// A deterministic one-stripe segment.
pub(crate) struct TestSegment {
    pub key: SegmentKey,
    pub nodes: Vec<NodeId>,
    /// Canonical shares, indexed by piece number.
    pub shares: Vec<Bytes>,
}

impl TestSegment {
    pub fn expected_hash(&self, piece_num: usize) -> [u8; 32] {
        Sha256::digest(&self.shares[piece_num]).into()
    }

    pub fn pending_audit(&self, piece_num: usize) -> PendingAudit {
        PendingAudit {
            node_id: self.nodes[piece_num],
            piece_id: root_piece_id(),
            stripe_index: 0,
            share_size: SHARE_SIZE,
            expected_share_hash: self.expected_hash(piece_num),
            path: self.key.clone(),
        }
    }
}

pub(crate) fn root_piece_id() -> PieceId {
    PieceId::from([9; 32])
}

pub(crate) fn test_pointer(nodes: &[NodeId], piece_hashes_verified: bool) -> Pointer {
    Pointer {
        creation_date: SystemTime::now(),
        expiration_date: None,
        pointer_type: PointerType::Remote,
        segment_size: SEGMENT_SIZE,
        root_piece_id: root_piece_id(),
        redundancy: Redundancy {
            required: REQUIRED,
            repair: REPAIR,
            optimal: TOTAL,
            total: TOTAL,
            erasure_share_size: SHARE_SIZE,
        },
        pieces: nodes
            .iter()
            .enumerate()
            .map(|(piece_num, node_id)| RemotePiece {
                piece_num: piece_num as u32,
                node_id: *node_id,
            })
            .collect(),
        piece_hashes_verified,
    }
}

/// Stores a one-stripe segment on six honest nodes and returns it.
pub(crate) fn setup_segment(
    harness: &Harness,
    name: &str,
    piece_hashes_verified: bool,
) -> TestSegment {
    let key = segment_key(name);
    let nodes: Vec<NodeId> = (1..=TOTAL as u8).map(node_id).collect();

    let stripe: Vec<u8> = (0..SEGMENT_SIZE).map(|b| (b % 251) as u8).collect();
    let code = fec::Fec::new(REQUIRED as usize, TOTAL as usize).unwrap();
    let mut shares = Vec::with_capacity(TOTAL as usize);
    for piece_num in 0..TOTAL as usize {
        let mut share = vec![0u8; SHARE_SIZE as usize];
        code.encode_single(&stripe, &mut share, piece_num).unwrap();
        shares.push(Bytes::from(share));
    }

    harness
        .metainfo
        .insert(key.clone(), test_pointer(&nodes, piece_hashes_verified));
    for (piece_num, node) in nodes.iter().enumerate() {
        harness
            .pieces
            .set_node(*node, NodeBehavior::Serve(shares[piece_num].clone()));
    }

    TestSegment { key, nodes, shares }
}

/// Asserts two node lists contain the same ids regardless of order.
pub(crate) fn assert_same_nodes(actual: &[NodeId], expected: &[NodeId]) {
    let mut actual: Vec<NodeId> = actual.to_vec();
    let mut expected: Vec<NodeId> = expected.to_vec();
    actual.sort();
    expected.sort();
    assert_eq!(actual, expected);
}
