//! Network height and peer-count tracking tests.

use crate::generators::*;
use crate::harness::*;
use nocturne_network::{Message, NewBlock};
use std::sync::Arc;

fn height_report(current_blockchain_height: u64) -> Message {
    // Outside Normal state only the height report of a new-block message is
    // consumed, which makes it a convenient pure height feed.
    Message::NewBlock(NewBlock {
        block_entry: empty_block_entry(block_id(200)),
        current_blockchain_height,
        hop: 0,
    })
}

// ============================================================================
// Observed height
// ============================================================================

#[test]
fn test_alt_chain_retreat_recomputes_observed_height() {
    let node = TestNode::new();
    let observer = Arc::new(CountingObserver::new());
    node.handler.add_observer(observer.clone());

    let p = node.connect_peer(1, 100, test_id(0x50));
    let _q = node.connect_peer(2, 92, test_id(0x51));
    assert_eq!(node.handler.observed_height(), 100);

    // P reorged onto a shorter chain and was the dominant reporter; the
    // aggregate falls back to the best of the others.
    node.resync_peer(&p, 95, test_id(0x52));

    assert_eq!(node.handler.observed_height(), 92);
    let heights = observer.heights();
    assert_eq!(heights, vec![100, 92]);
    assert!(!node.endpoint.was_dropped(&p));
}

#[test]
fn test_lower_report_from_non_dominant_peer_changes_nothing() {
    let node = TestNode::new();
    let observer = Arc::new(CountingObserver::new());
    node.handler.add_observer(observer.clone());

    let _p = node.connect_peer(1, 100, test_id(0x50));
    let q = node.connect_peer(2, 80, test_id(0x51));

    node.resync_peer(&q, 70, test_id(0x52));

    assert_eq!(node.handler.observed_height(), 100);
    assert_eq!(observer.heights(), vec![100]);
}

#[test]
fn test_equal_report_does_not_renotify() {
    let node = TestNode::new();
    let observer = Arc::new(CountingObserver::new());
    node.handler.add_observer(observer.clone());

    let _p = node.connect_peer(1, 50, test_id(0x50));
    let _q = node.connect_peer(2, 50, test_id(0x51));

    assert_eq!(observer.heights(), vec![50]);
}

#[test]
fn test_disconnect_of_dominant_peer_recomputes() {
    let node = TestNode::new();
    let observer = Arc::new(CountingObserver::new());
    node.handler.add_observer(observer.clone());

    let p = node.connect_peer(1, 100, test_id(0x50));
    let _q = node.connect_peer(2, 40, test_id(0x51));
    assert_eq!(node.handler.observed_height(), 100);

    node.disconnect_peer(&p);

    assert_eq!(node.handler.observed_height(), 40);
    assert_eq!(observer.heights(), vec![100, 40]);
}

#[test]
fn test_local_tip_floors_the_recompute() {
    let mut chain = vec![genesis_id()];
    chain.extend((1..=10u8).map(block_id));
    let node = TestNode::with_core(StubCore::with_chain(chain));

    let p = node.connect_peer(1, 100, test_id(0x50));
    node.disconnect_peer(&p);

    // No peers left; the local tip height carries the estimate.
    assert_eq!(node.handler.observed_height(), 10);
}

#[test]
fn test_gossip_height_reports_feed_the_aggregate() {
    let node = TestNode::new();
    let peer = node.connect_peer(1, 4, block_id(3));
    assert_eq!(node.handler.observed_height(), 4);

    node.deliver(&peer, height_report(9));

    assert_eq!(node.handler.observed_height(), 9);
    assert_eq!(node.endpoint.peer_context(&peer).remote_height, 9);
}

// ============================================================================
// Peer count
// ============================================================================

#[test]
fn test_peer_count_counts_only_handshaken_peers() {
    let node = TestNode::new();
    let observer = Arc::new(CountingObserver::new());
    node.handler.add_observer(observer.clone());

    let p = node.connect_peer(1, 1, genesis_id());
    let raw = node.endpoint.add_peer(2, true);
    assert_eq!(node.handler.peer_count(), 1);

    // Dropping a connection that never finished its handshake does not
    // disturb the count.
    node.disconnect_peer(&raw);
    assert_eq!(node.handler.peer_count(), 1);

    node.disconnect_peer(&p);
    assert_eq!(node.handler.peer_count(), 0);
    assert_eq!(observer.peer_counts(), vec![1, 0]);
}

#[test]
fn test_peer_count_across_multiple_connections() {
    let node = TestNode::new();

    let p = node.connect_peer(1, 1, genesis_id());
    let q = node.connect_peer(2, 4, block_id(3));
    assert_eq!(node.handler.peer_count(), 2);

    node.disconnect_peer(&q);
    assert_eq!(node.handler.peer_count(), 1);
    node.disconnect_peer(&p);
    assert_eq!(node.handler.peer_count(), 0);
}

// ============================================================================
// One-shot synchronized notification
// ============================================================================

#[test]
fn test_synchronized_fires_once_across_peers() {
    let node = TestNode::new();

    let _p = node.connect_peer(1, 1, genesis_id());
    assert!(node.handler.is_synchronized());
    assert_eq!(node.core.synchronized_calls(), 1);

    // A second peer that also finds us caught up does not refire.
    let _q = node.connect_peer(2, 1, genesis_id());
    assert_eq!(node.core.synchronized_calls(), 1);
}

#[test]
fn test_resync_after_orphan_does_not_refire_notification() {
    let node = TestNode::new();
    let peer = node.connect_peer(1, 1, genesis_id());
    assert_eq!(node.core.synchronized_calls(), 1);

    // An orphaned broadcast sends the peer back to Synchronizing...
    let orphan = block_id(9);
    node.core.mark_orphan(orphan);
    node.deliver(
        &peer,
        Message::NewBlock(NewBlock {
            block_entry: empty_block_entry(orphan),
            current_blockchain_height: 1,
            hop: 0,
        }),
    );

    // ...and completing that second round of sync stays silent.
    node.deliver(
        &peer,
        Message::ResponseChainEntry(nocturne_network::ResponseChainEntry {
            start_height: 0,
            total_height: 1,
            block_ids: vec![genesis_id()],
        }),
    );

    assert_eq!(node.core.synchronized_calls(), 1);
    assert!(node.handler.is_synchronized());
}

// ============================================================================
// Housekeeping
// ============================================================================

#[test]
fn test_idle_tick_reaches_the_core() {
    let node = TestNode::new();
    node.handler.on_idle();
    node.handler.on_idle();
    assert_eq!(node.core.idle_calls(), 2);
}
