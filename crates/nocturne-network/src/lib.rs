//! # nocturne-network
//!
//! P2P message vocabulary for the Nocturne blockchain.
//!
//! This crate provides:
//! - Content hashes and peer identities
//! - Blockchain sync protocol commands and payloads
//!
//! Connection I/O, framing and peer discovery live in the transport layer;
//! this crate only defines what travels between the transport and the
//! protocol handler.

mod hash;
mod message;
mod peer;

pub use hash::Hash;
pub use message::{
    BlockCompleteEntry, CoreSyncData, Message, NewBlock, NewTransactions, RequestChain,
    RequestGetObjects, ResponseChainEntry, ResponseGetObjects, BC_COMMANDS_POOL_BASE,
    NOTIFY_NEW_BLOCK, NOTIFY_NEW_TRANSACTIONS, NOTIFY_REQUEST_CHAIN, NOTIFY_REQUEST_GET_OBJECTS,
    NOTIFY_RESPONSE_CHAIN_ENTRY, NOTIFY_RESPONSE_GET_OBJECTS,
};
pub use peer::PeerId;
