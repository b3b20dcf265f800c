//! # nocturne-protocol
//!
//! Blockchain sync protocol for the Nocturne node.
//!
//! This crate provides:
//! - Per-peer synchronization state machine
//! - New-block and new-transaction gossip handling
//! - Network tip height tracking across peers
//! - Trait seams to the consensus core and the peer transport
//!
//! The handler consumes inbound commands the transport dispatches per
//! connection, queries and mutates the consensus core, and emits outbound
//! commands back through the transport. Misbehaving peers are dropped;
//! no reputation state is kept here.

mod config;
mod context;
mod core;
mod endpoint;
mod error;
mod handler;
mod height;
mod history;
mod observer;

pub use config::ProtocolConfig;
pub use context::{PeerContext, SyncState};
pub use core::{BlockInfo, BlockVerdict, ChainSupplement, ConsensusCore, MiningGuard, TxVerdict};
pub use endpoint::{EndpointStub, PeerEndpoint};
pub use error::{ProtocolError, ProtocolResult};
pub use handler::ProtocolHandler;
pub use height::ObservedHeight;
pub use history::short_history_heights;
pub use observer::{ObserverList, ProtocolObserver};

/// Number of blocks requested per `RequestGetObjects` batch during sync.
pub const BLOCKS_SYNCHRONIZING_DEFAULT_COUNT: usize = 200;
