//! Protocol error types.
//!
//! Every error a per-peer handler returns results in that peer being
//! dropped; nothing here propagates to other peers.

use thiserror::Error;

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer sent a malformed or off-protocol message.
    #[error("protocol violation: {0}")]
    Violation(String),

    /// The consensus core rejected a block or transaction from this peer.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// A block delivered during chain sync did not attach to the chain.
    #[error("block received at sync phase was marked as orphaned")]
    OrphanedDuringSync,

    /// Internal invariant broken; indicates a bug, not peer input.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
