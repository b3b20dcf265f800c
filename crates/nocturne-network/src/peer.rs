//! Peer identities.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Unique peer identifier assigned by the transport per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    /// Create from bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Create from a socket address.
    pub fn from_addr(addr: &SocketAddr) -> Self {
        Self(format!("{}", addr).into_bytes())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}
