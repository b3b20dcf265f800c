//! Per-peer protocol state.

use nocturne_network::{Hash, PeerId};
use std::collections::{HashSet, VecDeque};

/// Sync state of a single peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Connection accepted, no sync data exchanged yet.
    BeforeHandshake,
    /// Pulling the peer's chain: alternating chain-entry and get-objects
    /// rounds.
    Synchronizing,
    /// Batch abandoned because another peer delivered the same blocks first.
    Idle,
    /// Caught up with this peer; gossip flows normally.
    Normal,
}

/// Protocol-level state of one open connection.
///
/// Owned by the transport and handed to the handler by mutable reference;
/// only the thread dispatching this peer's commands mutates it, so no lock
/// is needed.
#[derive(Debug, Clone)]
pub struct PeerContext {
    /// Connection identity, assigned by the transport.
    pub id: PeerId,
    /// Current sync state.
    pub state: SyncState,
    /// Block count last reported by this peer.
    pub remote_height: u64,
    /// Height of the last chain-entry id this peer told us about.
    pub last_response_height: u64,
    /// Block ids the peer has and we lack, in chain order, not yet requested.
    pub needed_objects: VecDeque<Hash>,
    /// Block ids requested from this peer and not yet delivered.
    pub requested_objects: HashSet<Hash>,
    /// Outstanding self-callback requests.
    pub pending_callbacks: u32,
    /// True iff the peer dialed us.
    pub is_inbound: bool,
}

impl PeerContext {
    /// Create the context for a freshly accepted connection.
    pub fn new(id: PeerId, is_inbound: bool) -> Self {
        Self {
            id,
            state: SyncState::BeforeHandshake,
            remote_height: 0,
            last_response_height: 0,
            needed_objects: VecDeque::new(),
            requested_objects: HashSet::new(),
            pending_callbacks: 0,
            is_inbound,
        }
    }
}
