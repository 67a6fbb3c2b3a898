//! In-memory collaborators for tests.
//!
//! Each mock is a cheaply clonable handle over shared state, so a test can
//! keep its own handle to script behavior or assert on what an audit did.
//! Scripted mutations (a segment vanishing after its next read, a pending
//! audit vanishing after its next lookup) stand in for the concurrent
//! writers a production satellite would have.

use crate::{
    containment::{Containment, ContainmentError, PendingAudit},
    metainfo::{Metainfo, MetainfoError, Pointer, RemotePiece},
    orders::{AddressedOrderLimit, OrderError, OrderLimit, Orders},
    pieces::{PieceConnection, PieceError, PieceStore, Status, TransportError},
    types::{NodeId, NodeUrl, PieceId, PiecePrivateKey, SegmentKey},
};
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    future::{self, Future},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
};

/// The address every mock limit points at; routing happens by node id.
fn loopback_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7777)
}

// ---------------------------------------------------------------- metainfo

type PointerMutation = Box<dyn FnOnce(&mut Pointer) + Send>;

enum ScriptAction {
    Remove,
    Mutate(PointerMutation),
}

/// A concurrent-writer stand-in: fires after a number of successful reads.
struct Script {
    key: SegmentKey,
    reads_left: usize,
    action: ScriptAction,
}

#[derive(Default)]
struct MetainfoState {
    segments: HashMap<SegmentKey, StoredSegment>,
    scripts: Vec<Script>,
}

impl MetainfoState {
    fn run_scripts(&mut self, key: &SegmentKey) {
        let mut fired = Vec::new();
        for (i, script) in self.scripts.iter_mut().enumerate() {
            if script.key == *key {
                script.reads_left -= 1;
                if script.reads_left == 0 {
                    fired.push(i);
                }
            }
        }
        for i in fired.into_iter().rev() {
            match self.scripts.remove(i).action {
                ScriptAction::Remove => {
                    self.segments.remove(key);
                }
                ScriptAction::Mutate(mutate) => {
                    if let Some(stored) = self.segments.get_mut(key) {
                        mutate(&mut stored.pointer);
                        stored.version += 1;
                    }
                }
            }
        }
    }
}

struct StoredSegment {
    pointer: Pointer,
    version: u64,
}

impl StoredSegment {
    fn bytes(&self, key: &SegmentKey) -> Bytes {
        let mut image = key.as_bytes().to_vec();
        image.extend_from_slice(b"#");
        image.extend_from_slice(&self.version.to_be_bytes());
        image.into()
    }
}

/// An in-memory metainfo store.
#[derive(Clone, Default)]
pub struct InMemoryMetainfo {
    state: Arc<Mutex<MetainfoState>>,
}

impl InMemoryMetainfo {
    /// Stores a pointer under `key`, replacing any previous one.
    pub fn insert(&self, key: SegmentKey, pointer: Pointer) {
        let mut state = self.state.lock().unwrap();
        let version = state.segments.get(&key).map_or(1, |s| s.version + 1);
        state.segments.insert(key, StoredSegment { pointer, version });
    }

    /// Mutates the stored pointer, bumping its byte image.
    pub fn update(&self, key: &SegmentKey, mutate: impl FnOnce(&mut Pointer)) {
        let mut state = self.state.lock().unwrap();
        if let Some(stored) = state.segments.get_mut(key) {
            mutate(&mut stored.pointer);
            stored.version += 1;
        }
    }

    /// Removes the pointer immediately.
    pub fn remove(&self, key: &SegmentKey) {
        self.state.lock().unwrap().segments.remove(key);
    }

    /// Removes the pointer once `reads` more successful reads have
    /// completed.
    pub fn remove_after_reads(&self, key: SegmentKey, reads: usize) {
        assert!(reads > 0);
        self.state.lock().unwrap().scripts.push(Script {
            key,
            reads_left: reads,
            action: ScriptAction::Remove,
        });
    }

    /// Mutates the pointer once `reads` more successful reads have
    /// completed, bumping its byte image.
    pub fn mutate_after_reads(
        &self,
        key: SegmentKey,
        reads: usize,
        mutate: impl FnOnce(&mut Pointer) + Send + 'static,
    ) {
        assert!(reads > 0);
        self.state.lock().unwrap().scripts.push(Script {
            key,
            reads_left: reads,
            action: ScriptAction::Mutate(Box::new(mutate)),
        });
    }

    /// Returns the stored pointer, if any.
    pub fn pointer(&self, key: &SegmentKey) -> Option<Pointer> {
        let state = self.state.lock().unwrap();
        state.segments.get(key).map(|s| s.pointer.clone())
    }
}

impl Metainfo for InMemoryMetainfo {
    fn get_with_bytes(
        &self,
        key: &SegmentKey,
    ) -> impl Future<Output = Result<(Bytes, Pointer), MetainfoError>> + Send {
        let state = self.state.clone();
        let key = key.clone();
        async move {
            let mut state = state.lock().unwrap();
            let Some(stored) = state.segments.get(&key) else {
                return Err(MetainfoError::NotFound);
            };
            let result = (stored.bytes(&key), stored.pointer.clone());
            state.run_scripts(&key);
            Ok(result)
        }
    }

    fn delete(
        &self,
        key: &SegmentKey,
        prior_bytes: &Bytes,
    ) -> impl Future<Output = Result<(), MetainfoError>> + Send {
        let state = self.state.clone();
        let key = key.clone();
        let prior_bytes = prior_bytes.clone();
        async move {
            let mut state = state.lock().unwrap();
            let Some(stored) = state.segments.get(&key) else {
                return Err(MetainfoError::NotFound);
            };
            if stored.bytes(&key) != prior_bytes {
                return Err(MetainfoError::ValueChanged);
            }
            state.segments.remove(&key);
            Ok(())
        }
    }

    fn update_pieces(
        &self,
        key: &SegmentKey,
        prior: &Pointer,
        to_add: Vec<RemotePiece>,
        to_remove: Vec<RemotePiece>,
        check_duplicates: bool,
        set_hashes_verified: bool,
    ) -> impl Future<Output = Result<(), MetainfoError>> + Send {
        let state = self.state.clone();
        let key = key.clone();
        let prior = prior.clone();
        async move {
            let mut state = state.lock().unwrap();
            let Some(stored) = state.segments.get_mut(&key) else {
                return Err(MetainfoError::NotFound);
            };
            if stored.pointer != prior {
                return Err(MetainfoError::ValueChanged);
            }
            if check_duplicates {
                let existing: HashSet<NodeId> =
                    stored.pointer.pieces.iter().map(|p| p.node_id).collect();
                if to_add.iter().any(|p| existing.contains(&p.node_id)) {
                    return Err(MetainfoError::Unavailable("duplicate piece".into()));
                }
            }
            stored.pointer.pieces.retain(|piece| {
                !to_remove
                    .iter()
                    .any(|removed| removed.piece_num == piece.piece_num)
            });
            stored.pointer.pieces.extend(to_add);
            if set_hashes_verified {
                stored.pointer.piece_hashes_verified = true;
            }
            stored.version += 1;
            Ok(())
        }
    }
}

// ------------------------------------------------------------------ orders

/// Scripted overlay verdict for one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayState {
    Usable,
    Disqualified,
    FinishedExit,
    Offline,
}

#[derive(Default)]
struct OrdersState {
    overlay: HashMap<NodeId, OverlayState>,
    serial: u64,
}

impl OrdersState {
    fn next_limit(&mut self, node_id: NodeId, piece_id: PieceId, limit: u64) -> AddressedOrderLimit {
        self.serial += 1;
        let mut serial_number = [0u8; 16];
        serial_number[..8].copy_from_slice(&self.serial.to_be_bytes());
        AddressedOrderLimit {
            limit: OrderLimit {
                serial_number,
                node_id,
                piece_id,
                limit,
            },
            address: loopback_address(),
        }
    }
}

/// An in-memory order service backed by a scripted overlay.
#[derive(Clone, Default)]
pub struct InMemoryOrders {
    state: Arc<Mutex<OrdersState>>,
}

impl InMemoryOrders {
    /// Scripts the overlay's verdict for a node. Unscripted nodes are
    /// usable.
    pub fn set_overlay_state(&self, node_id: NodeId, overlay: OverlayState) {
        self.state.lock().unwrap().overlay.insert(node_id, overlay);
    }
}

impl Orders for InMemoryOrders {
    fn create_audit_order_limits(
        &self,
        _bucket: &[u8],
        pointer: &Pointer,
        skip: &HashSet<NodeId>,
    ) -> impl Future<Output = Result<(Vec<Option<AddressedOrderLimit>>, PiecePrivateKey), OrderError>>
           + Send {
        let state = self.state.clone();
        let pointer = pointer.clone();
        let skip = skip.clone();
        async move {
            let mut state = state.lock().unwrap();
            let mut limits = vec![None; pointer.redundancy.total as usize];
            for piece in &pointer.pieces {
                if skip.contains(&piece.node_id) {
                    continue;
                }
                let usable = matches!(
                    state.overlay.get(&piece.node_id),
                    None | Some(OverlayState::Usable)
                );
                if !usable {
                    continue;
                }
                let slot = piece.piece_num as usize;
                if slot >= limits.len() {
                    continue;
                }
                limits[slot] = Some(state.next_limit(
                    piece.node_id,
                    pointer.root_piece_id,
                    pointer.redundancy.erasure_share_size as u64,
                ));
            }
            Ok((limits, PiecePrivateKey::from([7u8; 32])))
        }
    }

    fn create_audit_order_limit(
        &self,
        _bucket: &[u8],
        node_id: NodeId,
        _piece_num: u32,
        piece_id: PieceId,
        share_size: u32,
    ) -> impl Future<Output = Result<(AddressedOrderLimit, PiecePrivateKey), OrderError>> + Send
    {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();
            match state.overlay.get(&node_id) {
                Some(OverlayState::Disqualified) => return Err(OrderError::NodeDisqualified),
                Some(OverlayState::FinishedExit) => return Err(OrderError::NodeFinishedExit),
                Some(OverlayState::Offline) => return Err(OrderError::NodeOffline),
                None | Some(OverlayState::Usable) => {}
            }
            let limit = state.next_limit(node_id, piece_id, share_size as u64);
            Ok((limit, PiecePrivateKey::from([7u8; 32])))
        }
    }
}

// ------------------------------------------------------------- containment

#[derive(Default)]
struct ContainmentState {
    pending: HashMap<NodeId, PendingAudit>,
    /// Nodes whose entry vanishes after this many more successful lookups.
    remove_after: HashMap<NodeId, usize>,
}

/// An in-memory containment store.
#[derive(Clone, Default)]
pub struct InMemoryContainment {
    state: Arc<Mutex<ContainmentState>>,
}

impl InMemoryContainment {
    /// Stores a pending audit, replacing any previous one for the node.
    pub fn insert(&self, pending: PendingAudit) {
        let mut state = self.state.lock().unwrap();
        state.pending.insert(pending.node_id, pending);
    }

    /// Removes the node's entry after `gets` more successful lookups, as a
    /// concurrent reverify settling it would.
    pub fn remove_after_gets(&self, node_id: NodeId, gets: usize) {
        self.state.lock().unwrap().remove_after.insert(node_id, gets);
    }

    /// Whether the node currently has a pending audit.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.state.lock().unwrap().pending.contains_key(node_id)
    }
}

impl Containment for InMemoryContainment {
    fn get(
        &self,
        node_id: &NodeId,
    ) -> impl Future<Output = Result<PendingAudit, ContainmentError>> + Send {
        let state = self.state.clone();
        let node_id = *node_id;
        async move {
            let mut state = state.lock().unwrap();
            let Some(pending) = state.pending.get(&node_id).cloned() else {
                return Err(ContainmentError::NotFound);
            };
            if let Some(remaining) = state.remove_after.get_mut(&node_id) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    state.remove_after.remove(&node_id);
                    state.pending.remove(&node_id);
                }
            }
            Ok(pending)
        }
    }

    fn delete(
        &self,
        node_id: &NodeId,
    ) -> impl Future<Output = Result<bool, ContainmentError>> + Send {
        let state = self.state.clone();
        let node_id = *node_id;
        async move {
            let mut state = state.lock().unwrap();
            Ok(state.pending.remove(&node_id).is_some())
        }
    }
}

// ------------------------------------------------------------------ pieces

/// Scripted behavior of one storage node.
#[derive(Clone, Debug)]
pub enum NodeBehavior {
    /// Hold these piece bytes and serve any in-range read of them.
    Serve(Bytes),
    /// Never complete the dial.
    DialHang,
    /// Refuse the dial outright.
    DialRefused,
    /// Dial fine, then never serve the read.
    DownloadHang,
    /// Dial fine, then answer with an application status.
    Respond(Status),
    /// Dial fine, then break the connection mid-read.
    BreakConnection,
}

/// An in-memory piece store routing downloads to scripted node behaviors.
#[derive(Clone, Default)]
pub struct LoopbackPieceStore {
    nodes: Arc<Mutex<HashMap<NodeId, NodeBehavior>>>,
}

impl LoopbackPieceStore {
    /// Scripts a node's behavior.
    pub fn set_node(&self, node_id: NodeId, behavior: NodeBehavior) {
        self.nodes.lock().unwrap().insert(node_id, behavior);
    }

    /// Replaces the bytes a serving node holds.
    pub fn corrupt_node(&self, node_id: NodeId, data: Bytes) {
        self.set_node(node_id, NodeBehavior::Serve(data));
    }
}

/// One scripted connection.
pub struct LoopbackConnection {
    behavior: NodeBehavior,
}

impl PieceStore for LoopbackPieceStore {
    type Connection = LoopbackConnection;

    fn dial(
        &self,
        target: &NodeUrl,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send {
        let behavior = self.nodes.lock().unwrap().get(&target.id).cloned();
        async move {
            match behavior {
                None => Err(TransportError::Dial("unknown node".into())),
                Some(NodeBehavior::DialHang) => future::pending().await,
                Some(NodeBehavior::DialRefused) => {
                    Err(TransportError::Dial("connection refused".into()))
                }
                Some(behavior) => Ok(LoopbackConnection { behavior }),
            }
        }
    }
}

impl PieceConnection for LoopbackConnection {
    fn download(
        &mut self,
        _limit: &OrderLimit,
        _piece_private_key: &PiecePrivateKey,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<Bytes, PieceError>> + Send {
        let behavior = self.behavior.clone();
        async move {
            match behavior {
                NodeBehavior::Serve(data) => {
                    let start = (offset as usize).min(data.len());
                    let end = ((offset + length) as usize).min(data.len());
                    Ok(data.slice(start..end))
                }
                NodeBehavior::DownloadHang => future::pending().await,
                NodeBehavior::Respond(status) => Err(PieceError::Status(status)),
                NodeBehavior::BreakConnection => Err(PieceError::Transport(
                    TransportError::Connection("connection reset".into()),
                )),
                NodeBehavior::DialHang | NodeBehavior::DialRefused => {
                    unreachable!("dial-level behaviors never produce a connection")
                }
            }
        }
    }
}
