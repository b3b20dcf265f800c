//! Blockchain sync protocol messages.
//!
//! Command numbers are fixed by the wire protocol and must not be renumbered:
//! remote nodes dispatch on them.

use crate::Hash;
use serde::{Deserialize, Serialize};

/// Base of the blockchain command number pool.
pub const BC_COMMANDS_POOL_BASE: u32 = 2000;

/// Broadcast of a freshly mined or relayed block.
pub const NOTIFY_NEW_BLOCK: u32 = BC_COMMANDS_POOL_BASE + 1;
/// Broadcast of transactions for mempool admission.
pub const NOTIFY_NEW_TRANSACTIONS: u32 = BC_COMMANDS_POOL_BASE + 2;
/// Request for full blocks (and transactions) by id.
pub const NOTIFY_REQUEST_GET_OBJECTS: u32 = BC_COMMANDS_POOL_BASE + 3;
/// Response carrying the requested objects.
pub const NOTIFY_RESPONSE_GET_OBJECTS: u32 = BC_COMMANDS_POOL_BASE + 4;
/// Request for a chain supplement, carrying a sparse history sample.
pub const NOTIFY_REQUEST_CHAIN: u32 = BC_COMMANDS_POOL_BASE + 6;
/// Response carrying the supplement block ids.
pub const NOTIFY_RESPONSE_CHAIN_ENTRY: u32 = BC_COMMANDS_POOL_BASE + 7;

/// Chain state advertised in handshakes and timed sync exchanges.
///
/// `current_height` counts blocks including genesis, so it is always the
/// local tip height plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreSyncData {
    /// Block count of the advertised chain.
    pub current_height: u64,
    /// Id of the advertised tip block.
    pub top_id: Hash,
}

/// A block blob together with the blobs of its transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCompleteEntry {
    /// Serialized block.
    pub block: Vec<u8>,
    /// Serialized transactions, in the order declared by the block.
    pub txs: Vec<Vec<u8>>,
}

/// `NOTIFY_NEW_BLOCK` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlock {
    /// The block and its transactions.
    pub block_entry: BlockCompleteEntry,
    /// Sender's chain block count at announcement time.
    pub current_blockchain_height: u64,
    /// Relay hop counter, incremented at each re-broadcast.
    pub hop: u32,
}

/// `NOTIFY_NEW_TRANSACTIONS` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransactions {
    /// Serialized transactions.
    pub txs: Vec<Vec<u8>>,
}

/// `NOTIFY_REQUEST_CHAIN` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestChain {
    /// Short chain history: dense near the tip, exponentially spaced toward
    /// genesis, genesis always last.
    pub block_ids: Vec<Hash>,
}

/// `NOTIFY_RESPONSE_CHAIN_ENTRY` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseChainEntry {
    /// Height of the first id in `block_ids`.
    pub start_height: u64,
    /// Responder's chain block count.
    pub total_height: u64,
    /// Contiguous block ids starting at the common ancestor.
    pub block_ids: Vec<Hash>,
}

/// `NOTIFY_REQUEST_GET_OBJECTS` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGetObjects {
    /// Block ids to fetch.
    pub blocks: Vec<Hash>,
    /// Transaction ids to fetch.
    pub txs: Vec<Hash>,
}

/// `NOTIFY_RESPONSE_GET_OBJECTS` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseGetObjects {
    /// Requested blocks with their transactions.
    pub blocks: Vec<BlockCompleteEntry>,
    /// Requested loose transactions.
    pub txs: Vec<Vec<u8>>,
    /// Ids the responder does not have.
    pub missed_ids: Vec<Hash>,
    /// Responder's chain block count.
    pub current_blockchain_height: u64,
}

/// A sync protocol message, as dispatched between transport and protocol
/// handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// New block broadcast.
    NewBlock(NewBlock),
    /// New transactions broadcast.
    NewTransactions(NewTransactions),
    /// Chain supplement request.
    RequestChain(RequestChain),
    /// Chain supplement response.
    ResponseChainEntry(ResponseChainEntry),
    /// Object fetch request.
    RequestGetObjects(RequestGetObjects),
    /// Object fetch response.
    ResponseGetObjects(ResponseGetObjects),
}

impl Message {
    /// Wire command number of this message.
    pub fn command_id(&self) -> u32 {
        match self {
            Message::NewBlock(_) => NOTIFY_NEW_BLOCK,
            Message::NewTransactions(_) => NOTIFY_NEW_TRANSACTIONS,
            Message::RequestChain(_) => NOTIFY_REQUEST_CHAIN,
            Message::ResponseChainEntry(_) => NOTIFY_RESPONSE_CHAIN_ENTRY,
            Message::RequestGetObjects(_) => NOTIFY_REQUEST_GET_OBJECTS,
            Message::ResponseGetObjects(_) => NOTIFY_RESPONSE_GET_OBJECTS,
        }
    }
}
