//! Consensus core seam.
//!
//! The protocol handler never validates or stores anything itself; it drives
//! a [`ConsensusCore`] that owns the canonical blockchain, the transaction
//! pool and the miner. Implementations must be internally thread-safe:
//! handlers for different peers call in concurrently.

use nocturne_network::{Hash, RequestGetObjects, ResponseGetObjects};

/// Verdict on one incoming transaction blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxVerdict {
    /// The transaction failed verification.
    pub verification_failed: bool,
    /// The transaction is new and valid and should be gossiped onward.
    pub should_be_relayed: bool,
}

/// Verdict on one incoming block blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockVerdict {
    /// The block was appended to the main chain.
    pub added_to_main_chain: bool,
    /// The block's parent is unknown; it was shelved as an orphan.
    pub marked_as_orphaned: bool,
    /// The block failed verification.
    pub verification_failed: bool,
}

/// Identity of a block as read from its serialized form.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Content hash of the block header.
    pub id: Hash,
    /// Transaction ids the block declares, in order.
    pub tx_hashes: Vec<Hash>,
}

/// A contiguous run of block ids a responder has beyond a common ancestor.
#[derive(Debug, Clone, Default)]
pub struct ChainSupplement {
    /// Height of the first id in `block_ids` (the common ancestor).
    pub start_height: u64,
    /// Responder's chain block count.
    pub total_height: u64,
    /// Block ids from the ancestor toward the responder's tip.
    pub block_ids: Vec<Hash>,
}

/// Capabilities the protocol handler requires of the consensus core.
pub trait ConsensusCore: Send + Sync {
    /// Whether the main chain (or orphan pool) contains this block.
    fn have_block(&self, id: &Hash) -> bool;

    /// Height and id of the main-chain tip.
    fn top(&self) -> (u64, Hash);

    /// Sample of local block ids, dense near the tip and exponentially
    /// spaced toward genesis, used to locate a common ancestor.
    fn short_chain_history(&self) -> Vec<Hash>;

    /// Find the contiguous tail of ids the local chain has beyond the
    /// newest locally-known id in `remote_history`. `None` when no common
    /// ancestor exists.
    fn find_supplement(&self, remote_history: &[Hash]) -> Option<ChainSupplement>;

    /// Read a block's id and declared transaction ids from its blob.
    /// `None` when the blob does not parse.
    fn parse_block(&self, blob: &[u8]) -> Option<BlockInfo>;

    /// Verify a transaction blob and admit it to the pool. `from_block` is
    /// true when the transaction arrived inside a block during sync rather
    /// than as loose gossip.
    fn handle_tx(&self, blob: &[u8], from_block: bool) -> TxVerdict;

    /// Verify a block blob and attach it to the chain. `from_broadcast`
    /// distinguishes gossiped blocks from sync-pulled ones; `from_self`
    /// marks blocks mined locally.
    fn handle_block(&self, blob: &[u8], from_broadcast: bool, from_self: bool) -> BlockVerdict;

    /// Serve a get-objects request from chain and pool. `None` when the
    /// request is malformed beyond what `missed_ids` can express.
    fn get_objects(&self, request: &RequestGetObjects) -> Option<ResponseGetObjects>;

    /// Suspend mining before a bulk block application.
    fn pause_mining(&self);

    /// Rebuild the block template against the new tip and resume mining.
    fn resume_and_rebuild_template(&self);

    /// Periodic housekeeping tick, forwarded from the node's idle timer.
    fn on_idle(&self);

    /// The node has caught up with the network for the first time.
    fn on_synchronized(&self);
}

/// Scoped mining suspension.
///
/// Pauses mining on construction and resumes (with a fresh template) when
/// dropped, so every exit path of a block-application region restores the
/// miner.
pub struct MiningGuard<'a> {
    core: &'a dyn ConsensusCore,
}

impl<'a> MiningGuard<'a> {
    /// Pause mining for the lifetime of the guard.
    pub fn new(core: &'a dyn ConsensusCore) -> Self {
        core.pause_mining();
        Self { core }
    }
}

impl Drop for MiningGuard<'_> {
    fn drop(&mut self) {
        self.core.resume_and_rebuild_template();
    }
}
