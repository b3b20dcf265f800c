//! Network tip height tracking.

use crate::{PeerContext, PeerEndpoint};
use parking_lot::Mutex;
use tracing::debug;

/// Best known network tip height, aggregated from peer reports and the
/// local chain.
///
/// Reports from advancing peers raise the value monotonically under the
/// lock. When the peer that set the current maximum retreats (a reorg onto
/// a shorter alternative chain) or disconnects, the value is recomputed
/// from scratch across the remaining peers and the local tip. Both paths
/// return the new value only when it changed, so the caller can notify
/// observers after the lock is released.
#[derive(Debug, Default)]
pub struct ObservedHeight {
    height: Mutex<u64>,
}

impl ObservedHeight {
    /// Create at height zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        *self.height.lock()
    }

    /// Fold in a fresh height report from `ctx`, which still carries the
    /// peer's previous report in `remote_height`. `local_tip` is consulted
    /// only on the recompute path.
    pub fn update(
        &self,
        peer_height: u64,
        ctx: &PeerContext,
        transport: &dyn PeerEndpoint,
        local_tip: impl FnOnce() -> u64,
    ) -> Option<u64> {
        let mut height = self.height.lock();
        let prev = *height;

        if peer_height > ctx.remote_height {
            *height = (*height).max(peer_height);
        } else if ctx.remote_height == *height {
            // The dominant reporter retreated; its old claim may have been
            // the only support for the current value.
            *height = Self::recompute(ctx, transport, local_tip());
        }

        let now = *height;
        drop(height);

        if now != prev {
            debug!(observed_height = now, "observed height updated");
            Some(now)
        } else {
            None
        }
    }

    /// Recompute after `ctx` disconnected.
    pub fn on_peer_closed(
        &self,
        ctx: &PeerContext,
        transport: &dyn PeerEndpoint,
        local_tip: impl FnOnce() -> u64,
    ) -> Option<u64> {
        let mut height = self.height.lock();
        let prev = *height;
        *height = Self::recompute(ctx, transport, local_tip());
        let now = *height;
        drop(height);

        if now != prev {
            debug!(observed_height = now, "observed height updated");
            Some(now)
        } else {
            None
        }
    }

    fn recompute(current: &PeerContext, transport: &dyn PeerEndpoint, local_tip: u64) -> u64 {
        let mut peer_max = 0u64;
        transport.for_each_peer(&mut |ctx| {
            if ctx.id != current.id {
                peer_max = peer_max.max(ctx.remote_height);
            }
            true
        });
        peer_max.max(local_tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndpointStub;
    use nocturne_network::PeerId;

    fn ctx_with_remote(seed: u8, remote_height: u64) -> PeerContext {
        let mut ctx = PeerContext::new(PeerId::from_bytes(vec![seed]), false);
        ctx.remote_height = remote_height;
        ctx
    }

    #[test]
    fn test_monotone_raise_on_advancing_peer() {
        let observed = ObservedHeight::new();
        let ctx = ctx_with_remote(1, 0);

        assert_eq!(observed.update(10, &ctx, &EndpointStub, || 0), Some(10));
        assert_eq!(observed.get(), 10);

        // A second peer reporting lower does not lower the aggregate.
        let other = ctx_with_remote(2, 3);
        assert_eq!(observed.update(7, &other, &EndpointStub, || 0), None);
        assert_eq!(observed.get(), 10);
    }

    #[test]
    fn test_non_dominant_retreat_is_ignored() {
        let observed = ObservedHeight::new();
        let riser = ctx_with_remote(1, 0);
        observed.update(10, &riser, &EndpointStub, || 0);

        // Peer previously at 7 drops to 5; it never set the maximum.
        let laggard = ctx_with_remote(2, 7);
        assert_eq!(observed.update(5, &laggard, &EndpointStub, || 0), None);
        assert_eq!(observed.get(), 10);
    }

    #[test]
    fn test_dominant_retreat_recomputes_from_local_tip() {
        let observed = ObservedHeight::new();
        let dominant = ctx_with_remote(1, 0);
        observed.update(100, &dominant, &EndpointStub, || 0);

        // Same peer (remote_height now 100) retreats to 95; with no other
        // peers the local tip wins.
        let retreating = ctx_with_remote(1, 100);
        assert_eq!(observed.update(95, &retreating, &EndpointStub, || 92), Some(92));
        assert_eq!(observed.get(), 92);
    }

    #[test]
    fn test_disconnect_recompute_falls_back_to_local() {
        let observed = ObservedHeight::new();
        let peer = ctx_with_remote(1, 0);
        observed.update(50, &peer, &EndpointStub, || 0);

        let gone = ctx_with_remote(1, 50);
        assert_eq!(observed.on_peer_closed(&gone, &EndpointStub, || 20), Some(20));
        assert_eq!(observed.get(), 20);
    }
}
