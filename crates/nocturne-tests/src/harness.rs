//! Test harness for integration tests.
//!
//! Provides a stub consensus core, a recording peer transport and a
//! counting observer, all interchangeable with the real implementations
//! behind the protocol's trait seams.

use crate::generators::genesis_id;
use nocturne_network::{
    BlockCompleteEntry, CoreSyncData, Hash, Message, PeerId, RequestGetObjects, ResponseGetObjects,
};
use nocturne_protocol::{
    short_history_heights, BlockInfo, BlockVerdict, ChainSupplement, ConsensusCore, PeerContext,
    PeerEndpoint, ProtocolConfig, ProtocolHandler, ProtocolObserver, TxVerdict,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory consensus core.
///
/// The chain is a vector of block ids, genesis at index zero. Verdicts are
/// steered per test by marking ids as orphaned or invalid before delivery.
pub struct StubCore {
    chain: Mutex<Vec<Hash>>,
    orphan_blocks: Mutex<HashSet<Hash>>,
    invalid_blocks: Mutex<HashSet<Hash>>,
    invalid_txs: Mutex<HashSet<Vec<u8>>>,
    suppressed_txs: Mutex<HashSet<Vec<u8>>>,
    objects: Mutex<HashMap<Hash, BlockCompleteEntry>>,
    fail_get_objects: AtomicBool,
    mining_pauses: AtomicUsize,
    mining_resumes: AtomicUsize,
    synchronized_calls: AtomicUsize,
    idle_calls: AtomicUsize,
}

impl StubCore {
    /// Create a core holding only the shared test genesis.
    pub fn new() -> Self {
        Self::with_chain(vec![genesis_id()])
    }

    /// Create a core over a prepared chain (genesis first).
    pub fn with_chain(chain: Vec<Hash>) -> Self {
        assert!(!chain.is_empty(), "a chain always holds genesis");
        Self {
            chain: Mutex::new(chain),
            orphan_blocks: Mutex::new(HashSet::new()),
            invalid_blocks: Mutex::new(HashSet::new()),
            invalid_txs: Mutex::new(HashSet::new()),
            suppressed_txs: Mutex::new(HashSet::new()),
            objects: Mutex::new(HashMap::new()),
            fail_get_objects: AtomicBool::new(false),
            mining_pauses: AtomicUsize::new(0),
            mining_resumes: AtomicUsize::new(0),
            synchronized_calls: AtomicUsize::new(0),
            idle_calls: AtomicUsize::new(0),
        }
    }

    /// Current chain ids, genesis first.
    pub fn chain(&self) -> Vec<Hash> {
        self.chain.lock().clone()
    }

    /// Tip height.
    pub fn height(&self) -> u64 {
        self.chain.lock().len() as u64 - 1
    }

    /// Append directly, bypassing verification (simulates another peer's
    /// delivery having been applied).
    pub fn append_block(&self, id: Hash) {
        self.chain.lock().push(id);
    }

    /// Future deliveries of this block id report an orphan verdict.
    pub fn mark_orphan(&self, id: Hash) {
        self.orphan_blocks.lock().insert(id);
    }

    /// Future deliveries of this block id fail verification.
    pub fn mark_invalid_block(&self, id: Hash) {
        self.invalid_blocks.lock().insert(id);
    }

    /// Future deliveries of this transaction blob fail verification.
    pub fn mark_invalid_tx(&self, blob: Vec<u8>) {
        self.invalid_txs.lock().insert(blob);
    }

    /// This transaction blob verifies but is not worth relaying (already
    /// pooled or policy-suppressed).
    pub fn suppress_tx(&self, blob: Vec<u8>) {
        self.suppressed_txs.lock().insert(blob);
    }

    /// Register an entry served by `get_objects`.
    pub fn insert_object(&self, id: Hash, entry: BlockCompleteEntry) {
        self.objects.lock().insert(id, entry);
    }

    /// Make `get_objects` report failure.
    pub fn fail_get_objects(&self) {
        self.fail_get_objects.store(true, Ordering::SeqCst);
    }

    /// Times mining was paused.
    pub fn mining_pauses(&self) -> usize {
        self.mining_pauses.load(Ordering::SeqCst)
    }

    /// Times mining was resumed.
    pub fn mining_resumes(&self) -> usize {
        self.mining_resumes.load(Ordering::SeqCst)
    }

    /// Times the synchronized notification reached the core.
    pub fn synchronized_calls(&self) -> usize {
        self.synchronized_calls.load(Ordering::SeqCst)
    }

    /// Times the idle tick reached the core.
    pub fn idle_calls(&self) -> usize {
        self.idle_calls.load(Ordering::SeqCst)
    }
}

impl Default for StubCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusCore for StubCore {
    fn have_block(&self, id: &Hash) -> bool {
        self.chain.lock().contains(id)
    }

    fn top(&self) -> (u64, Hash) {
        let chain = self.chain.lock();
        (chain.len() as u64 - 1, *chain.last().expect("genesis"))
    }

    fn short_chain_history(&self) -> Vec<Hash> {
        let chain = self.chain.lock();
        short_history_heights(chain.len() as u64 - 1)
            .into_iter()
            .map(|height| chain[height as usize])
            .collect()
    }

    fn find_supplement(&self, remote_history: &[Hash]) -> Option<ChainSupplement> {
        let chain = self.chain.lock();
        let ancestor = remote_history
            .iter()
            .find_map(|id| chain.iter().position(|known| known == id))?;
        Some(ChainSupplement {
            start_height: ancestor as u64,
            total_height: chain.len() as u64,
            block_ids: chain[ancestor..].to_vec(),
        })
    }

    fn parse_block(&self, blob: &[u8]) -> Option<BlockInfo> {
        if blob.len() < 32 || blob.len() % 32 != 0 {
            return None;
        }
        let id = Hash::from_slice(&blob[..32])?;
        let tx_hashes = blob[32..]
            .chunks(32)
            .filter_map(Hash::from_slice)
            .collect();
        Some(BlockInfo { id, tx_hashes })
    }

    fn handle_tx(&self, blob: &[u8], _from_block: bool) -> TxVerdict {
        if self.invalid_txs.lock().contains(blob) {
            return TxVerdict {
                verification_failed: true,
                should_be_relayed: false,
            };
        }
        TxVerdict {
            verification_failed: false,
            should_be_relayed: !self.suppressed_txs.lock().contains(blob),
        }
    }

    fn handle_block(&self, blob: &[u8], _from_broadcast: bool, _from_self: bool) -> BlockVerdict {
        let Some(info) = self.parse_block(blob) else {
            return BlockVerdict {
                verification_failed: true,
                ..Default::default()
            };
        };
        if self.invalid_blocks.lock().contains(&info.id) {
            return BlockVerdict {
                verification_failed: true,
                ..Default::default()
            };
        }
        if self.orphan_blocks.lock().contains(&info.id) {
            return BlockVerdict {
                marked_as_orphaned: true,
                ..Default::default()
            };
        }

        let mut chain = self.chain.lock();
        if chain.contains(&info.id) {
            // Already on the main chain; nothing to do.
            return BlockVerdict::default();
        }
        chain.push(info.id);
        BlockVerdict {
            added_to_main_chain: true,
            ..Default::default()
        }
    }

    fn get_objects(&self, request: &RequestGetObjects) -> Option<ResponseGetObjects> {
        if self.fail_get_objects.load(Ordering::SeqCst) {
            return None;
        }

        let objects = self.objects.lock();
        let mut response = ResponseGetObjects {
            current_blockchain_height: self.chain.lock().len() as u64,
            ..Default::default()
        };
        for id in &request.blocks {
            match objects.get(id) {
                Some(entry) => response.blocks.push(entry.clone()),
                None => response.missed_ids.push(*id),
            }
        }
        Some(response)
    }

    fn pause_mining(&self) {
        self.mining_pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_and_rebuild_template(&self) {
        self.mining_resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_idle(&self) {
        self.idle_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_synchronized(&self) {
        self.synchronized_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recording peer transport.
///
/// Owns the per-peer contexts the way the real transport does and logs
/// every outbound action for assertions. Dispatch checks a context out of
/// the table while the handler runs, mirroring the per-connection dispatch
/// serialization of the real transport.
#[derive(Default)]
pub struct TestEndpoint {
    peers: Mutex<HashMap<PeerId, PeerContext>>,
    posted: Mutex<Vec<(PeerId, Message)>>,
    relayed: Mutex<Vec<(Message, PeerId)>>,
    callback_requests: Mutex<Vec<PeerId>>,
    dropped: Mutex<Vec<PeerId>>,
    stopped: AtomicBool,
}

impl TestEndpoint {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a connection with a deterministic id.
    pub fn add_peer(&self, seed: u8, is_inbound: bool) -> PeerId {
        let id = PeerId::from_bytes(vec![seed]);
        self.peers
            .lock()
            .insert(id.clone(), PeerContext::new(id.clone(), is_inbound));
        id
    }

    /// Run `f` against the peer's context the way the transport dispatches
    /// a command: the context is checked out for the duration, and not put
    /// back if the handler dropped the peer meanwhile.
    pub fn with_peer<R>(&self, id: &PeerId, f: impl FnOnce(&mut PeerContext) -> R) -> R {
        let mut ctx = self
            .peers
            .lock()
            .remove(id)
            .expect("dispatch on unknown peer");
        let result = f(&mut ctx);
        if !self.was_dropped(id) {
            self.peers.lock().insert(id.clone(), ctx);
        }
        result
    }

    /// Snapshot of a live peer's context.
    pub fn peer_context(&self, id: &PeerId) -> PeerContext {
        self.peers.lock().get(id).expect("unknown peer").clone()
    }

    /// Remove and return a context, as a disconnect does.
    pub fn remove_peer(&self, id: &PeerId) -> PeerContext {
        self.peers.lock().remove(id).expect("unknown peer")
    }

    /// All messages posted to one peer.
    pub fn posted_to(&self, id: &PeerId) -> Vec<Message> {
        self.posted
            .lock()
            .iter()
            .filter(|(peer, _)| peer == id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Drain the posted-message log.
    pub fn take_posted(&self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut self.posted.lock())
    }

    /// All relayed messages with their excluded origin.
    pub fn relayed(&self) -> Vec<(Message, PeerId)> {
        self.relayed.lock().clone()
    }

    /// Peers whose callback was requested, in order.
    pub fn callback_requests(&self) -> Vec<PeerId> {
        self.callback_requests.lock().clone()
    }

    /// Whether the handler asked to drop this peer.
    pub fn was_dropped(&self, id: &PeerId) -> bool {
        self.dropped.lock().contains(id)
    }

    /// Whether transport shutdown was requested.
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl PeerEndpoint for TestEndpoint {
    fn for_each_peer(&self, visitor: &mut dyn FnMut(&PeerContext) -> bool) {
        for ctx in self.peers.lock().values() {
            if !visitor(ctx) {
                break;
            }
        }
    }

    fn post(&self, peer: &PeerId, message: Message) -> bool {
        self.posted.lock().push((peer.clone(), message));
        true
    }

    fn relay(&self, message: Message, exclude: &PeerId) -> bool {
        self.relayed.lock().push((message, exclude.clone()));
        true
    }

    fn request_callback(&self, peer: &PeerId) {
        self.callback_requests.lock().push(peer.clone());
    }

    fn drop_peer(&self, peer: &PeerId) {
        self.dropped.lock().push(peer.clone());
        self.peers.lock().remove(peer);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Observer recording every notification it receives.
#[derive(Default)]
pub struct CountingObserver {
    heights: Mutex<Vec<u64>>,
    peer_counts: Mutex<Vec<usize>>,
}

impl CountingObserver {
    /// Create an observer with empty logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observed-height notifications, in order.
    pub fn heights(&self) -> Vec<u64> {
        self.heights.lock().clone()
    }

    /// Peer-count notifications, in order.
    pub fn peer_counts(&self) -> Vec<usize> {
        self.peer_counts.lock().clone()
    }
}

impl ProtocolObserver for CountingObserver {
    fn observed_height_updated(&self, height: u64) {
        self.heights.lock().push(height);
    }

    fn peer_count_updated(&self, count: usize) {
        self.peer_counts.lock().push(count);
    }
}

/// A protocol handler wired to a stub core and a recording transport.
pub struct TestNode {
    /// The stub consensus core.
    pub core: Arc<StubCore>,
    /// The recording transport.
    pub endpoint: Arc<TestEndpoint>,
    /// The handler under test.
    pub handler: ProtocolHandler,
}

impl TestNode {
    /// Node holding only genesis.
    pub fn new() -> Self {
        Self::with_core(StubCore::new())
    }

    /// Node over a prepared stub core.
    pub fn with_core(core: StubCore) -> Self {
        Self::with_config(core, ProtocolConfig::default())
    }

    /// Node over a prepared stub core and custom configuration.
    pub fn with_config(core: StubCore, config: ProtocolConfig) -> Self {
        let core = Arc::new(core);
        let endpoint = Arc::new(TestEndpoint::new());
        let handler = ProtocolHandler::new(core.clone(), config);
        handler.set_transport(endpoint.clone());
        Self {
            core,
            endpoint,
            handler,
        }
    }

    /// Accept a connection and feed its initial sync data.
    pub fn connect_peer(&self, seed: u8, current_height: u64, top_id: Hash) -> PeerId {
        let id = self.endpoint.add_peer(seed, false);
        let data = CoreSyncData {
            current_height,
            top_id,
        };
        self.endpoint.with_peer(&id, |ctx| {
            self.handler.process_payload_sync_data(ctx, &data, true);
        });
        id
    }

    /// Feed a non-initial sync data exchange for a live peer.
    pub fn resync_peer(&self, id: &PeerId, current_height: u64, top_id: Hash) {
        let data = CoreSyncData {
            current_height,
            top_id,
        };
        self.endpoint.with_peer(id, |ctx| {
            self.handler.process_payload_sync_data(ctx, &data, false);
        });
    }

    /// Dispatch one inbound message for a live peer.
    pub fn deliver(&self, id: &PeerId, message: Message) {
        self.endpoint.with_peer(id, |ctx| {
            self.handler.on_message(ctx, message);
        });
    }

    /// Fire the transport callback for a live peer.
    pub fn fire_callback(&self, id: &PeerId) {
        self.endpoint.with_peer(id, |ctx| {
            self.handler.on_callback(ctx);
        });
    }

    /// Disconnect a live peer and run the protocol cleanup.
    pub fn disconnect_peer(&self, id: &PeerId) {
        let ctx = self.endpoint.remove_peer(id);
        self.handler.on_peer_disconnected(&ctx);
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}
