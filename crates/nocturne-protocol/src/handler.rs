//! Synchronization protocol handler.
//!
//! This module implements the Nocturne sync protocol:
//! 1. Exchange chain state with peers at handshake
//! 2. Walk back to a common ancestor via chain-entry exchanges
//! 3. Pull, verify and apply the missing blocks in batches
//! 4. Gossip new blocks and transactions once caught up
//!
//! The transport dispatches inbound commands one at a time per connection
//! and hands the peer's context in by mutable reference; handlers for
//! different peers run concurrently. Any protocol violation or verification
//! failure drops the offending peer and nothing else.

use crate::core::{ConsensusCore, MiningGuard};
use crate::{
    ObservedHeight, ObserverList, PeerContext, PeerEndpoint, ProtocolConfig, ProtocolError,
    ProtocolObserver, ProtocolResult, SyncState,
};
use nocturne_network::{
    CoreSyncData, Message, NewBlock, NewTransactions, RequestChain, RequestGetObjects,
    ResponseChainEntry, ResponseGetObjects,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives every peer connection from handshake through chain catch-up to
/// steady-state gossip.
pub struct ProtocolHandler {
    /// Consensus core owning the canonical chain and pool.
    core: Arc<dyn ConsensusCore>,
    /// Peer transport; starts as a stub until the real one is injected.
    transport: RwLock<Arc<dyn PeerEndpoint>>,
    /// Tunables.
    config: ProtocolConfig,
    /// Best known network tip height.
    observed_height: ObservedHeight,
    /// Height and peer-count observers.
    observers: ObserverList,
    /// Peers past the initial handshake.
    peers_count: AtomicUsize,
    /// One-shot latch: flips once when the node first catches up.
    synchronized: AtomicBool,
    /// Cooperative shutdown flag, polled inside long loops.
    stopping: AtomicBool,
}

impl ProtocolHandler {
    /// Create a handler over `core` with no transport attached yet.
    pub fn new(core: Arc<dyn ConsensusCore>, config: ProtocolConfig) -> Self {
        Self {
            core,
            transport: RwLock::new(Arc::new(crate::EndpointStub)),
            config,
            observed_height: ObservedHeight::new(),
            observers: ObserverList::new(),
            peers_count: AtomicUsize::new(0),
            synchronized: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Inject the peer transport once it exists.
    pub fn set_transport(&self, transport: Arc<dyn PeerEndpoint>) {
        *self.transport.write() = transport;
    }

    fn transport(&self) -> Arc<dyn PeerEndpoint> {
        self.transport.read().clone()
    }

    /// Register a protocol observer.
    pub fn add_observer(&self, observer: Arc<dyn ProtocolObserver>) {
        self.observers.add(observer);
    }

    /// Unregister a protocol observer.
    pub fn remove_observer(&self, observer: &Arc<dyn ProtocolObserver>) {
        self.observers.remove(observer);
    }

    /// Number of peers past the initial handshake.
    pub fn peer_count(&self) -> usize {
        self.peers_count.load(Ordering::SeqCst)
    }

    /// Best known network tip height.
    pub fn observed_height(&self) -> u64 {
        self.observed_height.get()
    }

    /// Whether the node has caught up with the network at least once.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::SeqCst)
    }

    /// Number of connections currently pulling our or a peer's chain.
    pub fn synchronizing_peer_count(&self) -> usize {
        let mut count = 0;
        self.transport().for_each_peer(&mut |ctx| {
            if ctx.state == SyncState::Synchronizing {
                count += 1;
            }
            true
        });
        count
    }

    /// Request cooperative shutdown; block application stops between blocks.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Periodic housekeeping, forwarded to the consensus core.
    pub fn on_idle(&self) {
        self.core.on_idle();
    }

    /// Chain state to advertise in our own handshakes and timed syncs.
    ///
    /// `current_height` counts blocks including genesis, hence tip + 1.
    pub fn get_payload_sync_data(&self) -> CoreSyncData {
        let (height, top_id) = self.core.top();
        CoreSyncData {
            current_height: height + 1,
            top_id,
        }
    }

    /// Process the chain state a peer advertised in a handshake or timed
    /// sync exchange. `is_initial` marks the first exchange of a connection.
    pub fn process_payload_sync_data(
        &self,
        ctx: &mut PeerContext,
        data: &CoreSyncData,
        is_initial: bool,
    ) {
        if ctx.state == SyncState::BeforeHandshake && !is_initial {
            return;
        }

        if ctx.state == SyncState::Synchronizing {
            // Duplicate sync data midstream; the running exchange stands.
        } else if self.core.have_block(&data.top_id) {
            ctx.state = SyncState::Normal;
            if is_initial {
                self.on_connection_synchronized();
            }
        } else {
            let local_count = self.core.top().0 + 1;
            let delta = data.current_height as i128 - local_count as i128;
            info!(
                peer = %ctx.id,
                local_height = local_count,
                remote_height = data.current_height,
                delta,
                top_id = %data.top_id,
                "unknown top block, synchronization started"
            );
            ctx.state = SyncState::Synchronizing;
            // Let the transport flush the handshake response first; the
            // chain request goes out from the callback.
            ctx.pending_callbacks += 1;
            self.transport().request_callback(&ctx.id);
        }

        self.update_observed_height(data.current_height, ctx);
        ctx.remote_height = data.current_height;

        if is_initial {
            let count = self.peers_count.fetch_add(1, Ordering::SeqCst) + 1;
            self.observers.notify(|obs| obs.peer_count_updated(count));
        }
    }

    /// Transport-requested self-wakeup for this peer.
    pub fn on_callback(&self, ctx: &mut PeerContext) {
        debug!(peer = %ctx.id, "callback fired");
        if let Err(err) = self.callback(ctx) {
            warn!(peer = %ctx.id, error = %err, "dropping connection");
            self.transport().drop_peer(&ctx.id);
        }
    }

    fn callback(&self, ctx: &mut PeerContext) -> ProtocolResult<()> {
        if ctx.pending_callbacks == 0 {
            return Err(ProtocolError::Internal(
                "callback fired with no callback requested".into(),
            ));
        }
        ctx.pending_callbacks -= 1;

        if ctx.state == SyncState::Synchronizing {
            self.send_request_chain(ctx);
        }
        Ok(())
    }

    /// Dispatch one inbound command for `ctx`'s peer. Errors drop the peer.
    pub fn on_message(&self, ctx: &mut PeerContext, message: Message) {
        let result = match message {
            Message::NewBlock(arg) => self.handle_new_block(ctx, arg),
            Message::NewTransactions(arg) => self.handle_new_transactions(ctx, arg),
            Message::RequestChain(arg) => self.handle_request_chain(ctx, arg),
            Message::ResponseChainEntry(arg) => self.handle_response_chain_entry(ctx, arg),
            Message::RequestGetObjects(arg) => self.handle_request_get_objects(ctx, arg),
            Message::ResponseGetObjects(arg) => self.handle_response_get_objects(ctx, arg),
        };

        if let Err(err) = result {
            warn!(peer = %ctx.id, error = %err, "dropping connection");
            self.transport().drop_peer(&ctx.id);
        }
    }

    /// The transport destroyed this peer's connection.
    pub fn on_peer_disconnected(&self, ctx: &PeerContext) {
        let transport = self.transport();
        let changed =
            self.observed_height
                .on_peer_closed(ctx, &*transport, || self.core.top().0);
        if let Some(height) = changed {
            self.observers.notify(|obs| obs.observed_height_updated(height));
        }

        if ctx.state != SyncState::BeforeHandshake {
            let count = self.peers_count.fetch_sub(1, Ordering::SeqCst) - 1;
            self.observers.notify(|obs| obs.peer_count_updated(count));
        }
    }

    fn handle_new_block(&self, ctx: &mut PeerContext, arg: NewBlock) -> ProtocolResult<()> {
        debug!(peer = %ctx.id, hop = arg.hop, "new block");

        self.update_observed_height(arg.current_blockchain_height, ctx);
        ctx.remote_height = arg.current_blockchain_height;

        if ctx.state != SyncState::Normal {
            // Still syncing with this peer; the block will arrive through
            // the object pull.
            return Ok(());
        }

        for tx_blob in &arg.block_entry.txs {
            let verdict = self.core.handle_tx(tx_blob, true);
            if verdict.verification_failed {
                return Err(ProtocolError::VerificationFailed(
                    "transaction in block broadcast rejected".into(),
                ));
            }
        }

        let verdict = self.core.handle_block(&arg.block_entry.block, true, false);
        if verdict.verification_failed {
            return Err(ProtocolError::VerificationFailed(
                "broadcast block rejected".into(),
            ));
        }

        if verdict.added_to_main_chain {
            let mut relayed = arg;
            relayed.hop += 1;
            debug!(peer = %ctx.id, hop = relayed.hop, "relaying block");
            self.transport().relay(Message::NewBlock(relayed), &ctx.id);
        } else if verdict.marked_as_orphaned {
            ctx.state = SyncState::Synchronizing;
            self.send_request_chain(ctx);
        }

        Ok(())
    }

    fn handle_new_transactions(
        &self,
        ctx: &mut PeerContext,
        arg: NewTransactions,
    ) -> ProtocolResult<()> {
        if ctx.state != SyncState::Normal {
            return Ok(());
        }

        let mut relayable = Vec::with_capacity(arg.txs.len());
        for tx_blob in arg.txs {
            let verdict = self.core.handle_tx(&tx_blob, false);
            if verdict.verification_failed {
                return Err(ProtocolError::VerificationFailed(
                    "gossiped transaction rejected".into(),
                ));
            }
            if verdict.should_be_relayed {
                relayable.push(tx_blob);
            }
        }

        if !relayable.is_empty() {
            self.transport().relay(
                Message::NewTransactions(NewTransactions { txs: relayable }),
                &ctx.id,
            );
        }

        Ok(())
    }

    fn handle_request_chain(&self, ctx: &mut PeerContext, arg: RequestChain) -> ProtocolResult<()> {
        debug!(peer = %ctx.id, history_len = arg.block_ids.len(), "chain requested");

        let Some(supplement) = self.core.find_supplement(&arg.block_ids) else {
            error!(peer = %ctx.id, "failed to build chain supplement");
            return Ok(());
        };

        debug!(
            peer = %ctx.id,
            start_height = supplement.start_height,
            total_height = supplement.total_height,
            ids = supplement.block_ids.len(),
            "sending chain entry"
        );
        self.post(
            ctx,
            Message::ResponseChainEntry(ResponseChainEntry {
                start_height: supplement.start_height,
                total_height: supplement.total_height,
                block_ids: supplement.block_ids,
            }),
        );
        Ok(())
    }

    fn handle_response_chain_entry(
        &self,
        ctx: &mut PeerContext,
        arg: ResponseChainEntry,
    ) -> ProtocolResult<()> {
        debug!(
            peer = %ctx.id,
            start_height = arg.start_height,
            total_height = arg.total_height,
            ids = arg.block_ids.len(),
            "chain entry received"
        );

        if arg.block_ids.is_empty() {
            return Err(ProtocolError::Violation("sent empty block_ids".into()));
        }

        let first = arg.block_ids[0];
        if !self.core.have_block(&first) {
            return Err(ProtocolError::Violation(format!(
                "block_ids start from unknown id {}",
                first
            )));
        }

        let last_height = arg
            .start_height
            .checked_add(arg.block_ids.len() as u64 - 1)
            .ok_or_else(|| ProtocolError::Violation("chain entry height overflow".into()))?;

        ctx.remote_height = arg.total_height;
        ctx.last_response_height = last_height;
        if ctx.last_response_height > ctx.remote_height {
            return Err(ProtocolError::Violation(format!(
                "chain entry ends at height {} beyond claimed total {}",
                ctx.last_response_height, ctx.remote_height
            )));
        }

        for id in &arg.block_ids {
            if !self.core.have_block(id) {
                ctx.needed_objects.push_back(*id);
            }
        }

        self.request_missing_objects(ctx, false)
    }

    fn handle_request_get_objects(
        &self,
        ctx: &mut PeerContext,
        arg: RequestGetObjects,
    ) -> ProtocolResult<()> {
        debug!(
            peer = %ctx.id,
            blocks = arg.blocks.len(),
            txs = arg.txs.len(),
            "objects requested"
        );

        let Some(response) = self.core.get_objects(&arg) else {
            return Err(ProtocolError::Violation(
                "failed to serve get-objects request".into(),
            ));
        };

        debug!(
            peer = %ctx.id,
            blocks = response.blocks.len(),
            txs = response.txs.len(),
            missed = response.missed_ids.len(),
            current_blockchain_height = response.current_blockchain_height,
            "sending objects"
        );
        self.post(ctx, Message::ResponseGetObjects(response));
        Ok(())
    }

    fn handle_response_get_objects(
        &self,
        ctx: &mut PeerContext,
        arg: ResponseGetObjects,
    ) -> ProtocolResult<()> {
        debug!(peer = %ctx.id, blocks = arg.blocks.len(), "objects received");

        if ctx.last_response_height > arg.current_blockchain_height {
            return Err(ProtocolError::Violation(format!(
                "claimed blockchain height {} below last chain entry height {}",
                arg.current_blockchain_height, ctx.last_response_height
            )));
        }

        self.update_observed_height(arg.current_blockchain_height, ctx);
        ctx.remote_height = arg.current_blockchain_height;

        for (index, entry) in arg.blocks.iter().enumerate() {
            let Some(info) = self.core.parse_block(&entry.block) else {
                return Err(ProtocolError::Violation("sent unparsable block".into()));
            };

            // Another peer may be delivering the same span. If the second
            // block is already known, that delivery won the race; park this
            // connection instead of applying the batch twice.
            if index == 1 && self.core.have_block(&info.id) {
                ctx.state = SyncState::Idle;
                ctx.needed_objects.clear();
                ctx.requested_objects.clear();
                info!(peer = %ctx.id, "connection set to idle state");
                return Ok(());
            }

            if !ctx.requested_objects.remove(&info.id) {
                return Err(ProtocolError::Violation(format!(
                    "block {} was not requested",
                    info.id
                )));
            }

            if info.tx_hashes.len() != entry.txs.len() {
                return Err(ProtocolError::Violation(format!(
                    "block {} declares {} txs but {} were delivered",
                    info.id,
                    info.tx_hashes.len(),
                    entry.txs.len()
                )));
            }
        }

        if !ctx.requested_objects.is_empty() {
            return Err(ProtocolError::Violation(format!(
                "{} requested objects were not returned",
                ctx.requested_objects.len()
            )));
        }

        {
            let _mining = MiningGuard::new(&*self.core);

            for entry in &arg.blocks {
                if self.stopping.load(Ordering::SeqCst) {
                    break;
                }

                for tx_blob in &entry.txs {
                    let verdict = self.core.handle_tx(tx_blob, true);
                    if verdict.verification_failed {
                        return Err(ProtocolError::VerificationFailed(
                            "transaction in sync block rejected".into(),
                        ));
                    }
                }

                let verdict = self.core.handle_block(&entry.block, false, false);
                if verdict.verification_failed {
                    return Err(ProtocolError::VerificationFailed(
                        "sync block rejected".into(),
                    ));
                }
                if verdict.marked_as_orphaned {
                    return Err(ProtocolError::OrphanedDuringSync);
                }
            }
        }

        if !self.stopping.load(Ordering::SeqCst) {
            self.request_missing_objects(ctx, true)?;
        }

        Ok(())
    }

    /// Move the next batch of needed ids into flight, or fetch more ids, or
    /// conclude that this peer has nothing left for us.
    fn request_missing_objects(
        &self,
        ctx: &mut PeerContext,
        check_having: bool,
    ) -> ProtocolResult<()> {
        if !ctx.needed_objects.is_empty() {
            let mut blocks = Vec::new();
            while blocks.len() < self.config.blocks_sync_batch {
                let Some(id) = ctx.needed_objects.pop_front() else {
                    break;
                };
                if check_having && self.core.have_block(&id) {
                    continue;
                }
                ctx.requested_objects.insert(id);
                blocks.push(id);
            }

            debug!(
                peer = %ctx.id,
                blocks = blocks.len(),
                still_needed = ctx.needed_objects.len(),
                "requesting objects"
            );
            self.post(
                ctx,
                Message::RequestGetObjects(RequestGetObjects {
                    blocks,
                    txs: Vec::new(),
                }),
            );
        } else if ctx.last_response_height < ctx.remote_height.saturating_sub(1) {
            // The peer's chain extends past the last entry we saw; fetch
            // more ids.
            self.send_request_chain(ctx);
        } else {
            if ctx.last_response_height != ctx.remote_height.saturating_sub(1)
                || !ctx.requested_objects.is_empty()
            {
                return Err(ProtocolError::Internal(format!(
                    "sync final condition failed: last_response_height={}, remote_height={}, needed={}, requested={}",
                    ctx.last_response_height,
                    ctx.remote_height,
                    ctx.needed_objects.len(),
                    ctx.requested_objects.len()
                )));
            }

            ctx.state = SyncState::Normal;
            info!(peer = %ctx.id, "synchronized with peer");
            self.on_connection_synchronized();
        }
        Ok(())
    }

    fn send_request_chain(&self, ctx: &PeerContext) {
        let block_ids = self.core.short_chain_history();
        debug!(peer = %ctx.id, ids = block_ids.len(), "requesting chain");
        self.post(ctx, Message::RequestChain(RequestChain { block_ids }));
    }

    fn on_connection_synchronized(&self) {
        if self
            .synchronized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("you are now synchronized with the network; dependent services may start");
            self.core.on_synchronized();
        }
    }

    fn update_observed_height(&self, peer_height: u64, ctx: &PeerContext) {
        let transport = self.transport();
        let changed =
            self.observed_height
                .update(peer_height, ctx, &*transport, || self.core.top().0);
        if let Some(height) = changed {
            self.observers.notify(|obs| obs.observed_height_updated(height));
        }
    }

    fn post(&self, ctx: &PeerContext, message: Message) {
        let command = message.command_id();
        if !self.transport().post(&ctx.id, message) {
            debug!(peer = %ctx.id, command, "failed to queue message");
        }
    }
}

impl std::fmt::Debug for ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("peers_count", &self.peer_count())
            .field("observed_height", &self.observed_height())
            .field("synchronized", &self.is_synchronized())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockInfo, BlockVerdict, ChainSupplement, TxVerdict};
    use nocturne_network::{Hash, PeerId};

    /// Core that knows exactly one block: genesis.
    struct GenesisCore;

    const GENESIS: Hash = Hash([0xAA; 32]);

    impl ConsensusCore for GenesisCore {
        fn have_block(&self, id: &Hash) -> bool {
            *id == GENESIS
        }
        fn top(&self) -> (u64, Hash) {
            (0, GENESIS)
        }
        fn short_chain_history(&self) -> Vec<Hash> {
            vec![GENESIS]
        }
        fn find_supplement(&self, _remote_history: &[Hash]) -> Option<ChainSupplement> {
            None
        }
        fn parse_block(&self, _blob: &[u8]) -> Option<BlockInfo> {
            None
        }
        fn handle_tx(&self, _blob: &[u8], _from_block: bool) -> TxVerdict {
            TxVerdict::default()
        }
        fn handle_block(&self, _blob: &[u8], _from_broadcast: bool, _from_self: bool) -> BlockVerdict {
            BlockVerdict::default()
        }
        fn get_objects(&self, _request: &RequestGetObjects) -> Option<ResponseGetObjects> {
            None
        }
        fn pause_mining(&self) {}
        fn resume_and_rebuild_template(&self) {}
        fn on_idle(&self) {}
        fn on_synchronized(&self) {}
    }

    #[test]
    fn test_payload_sync_data_counts_genesis() {
        let handler = ProtocolHandler::new(Arc::new(GenesisCore), ProtocolConfig::default());
        let data = handler.get_payload_sync_data();

        assert_eq!(data.current_height, 1);
        assert_eq!(data.top_id, GENESIS);
    }

    #[test]
    fn test_known_top_goes_normal_and_synchronizes_once() {
        let handler = ProtocolHandler::new(Arc::new(GenesisCore), ProtocolConfig::default());
        let mut ctx = PeerContext::new(PeerId::from_bytes(vec![1]), false);
        let data = CoreSyncData {
            current_height: 1,
            top_id: GENESIS,
        };

        handler.process_payload_sync_data(&mut ctx, &data, true);

        assert_eq!(ctx.state, SyncState::Normal);
        assert!(handler.is_synchronized());
        assert_eq!(handler.peer_count(), 1);
    }

    #[test]
    fn test_non_initial_data_before_handshake_is_ignored() {
        let handler = ProtocolHandler::new(Arc::new(GenesisCore), ProtocolConfig::default());
        let mut ctx = PeerContext::new(PeerId::from_bytes(vec![1]), false);
        let data = CoreSyncData {
            current_height: 9,
            top_id: Hash([3; 32]),
        };

        handler.process_payload_sync_data(&mut ctx, &data, false);

        assert_eq!(ctx.state, SyncState::BeforeHandshake);
        assert_eq!(ctx.remote_height, 0);
        assert_eq!(handler.peer_count(), 0);
    }

    #[test]
    fn test_unknown_top_starts_synchronizing_with_callback() {
        let handler = ProtocolHandler::new(Arc::new(GenesisCore), ProtocolConfig::default());
        let mut ctx = PeerContext::new(PeerId::from_bytes(vec![1]), false);
        let data = CoreSyncData {
            current_height: 5,
            top_id: Hash([7; 32]),
        };

        handler.process_payload_sync_data(&mut ctx, &data, true);

        assert_eq!(ctx.state, SyncState::Synchronizing);
        assert_eq!(ctx.pending_callbacks, 1);
        assert_eq!(ctx.remote_height, 5);
        assert_eq!(handler.observed_height(), 5);
        assert!(!handler.is_synchronized());
    }

    #[test]
    fn test_stop_flag() {
        let handler = ProtocolHandler::new(Arc::new(GenesisCore), ProtocolConfig::default());
        assert!(!handler.is_stopping());
        handler.stop();
        assert!(handler.is_stopping());
    }
}
