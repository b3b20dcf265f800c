//! Property-based tests using proptest.
//!
//! Verifies the chain locator schedule and the observed-height aggregation
//! against randomly generated peer behavior with shrinking support.

use crate::generators::*;
use crate::harness::*;
use nocturne_network::{Message, NewBlock, PeerId};
use nocturne_protocol::short_history_heights;
use proptest::prelude::*;

/// Generate arbitrary tip heights.
fn arb_top_height() -> impl Strategy<Value = u64> {
    0u64..=2_000_000u64
}

fn feed_height(node: &TestNode, peer: &PeerId, height: u64) {
    // Outside Normal state only the height report of a new-block message is
    // consumed, so this feeds the aggregator without touching the core.
    node.endpoint.with_peer(peer, |ctx| {
        node.handler.on_message(
            ctx,
            Message::NewBlock(NewBlock {
                block_entry: empty_block_entry(block_id(200)),
                current_blockchain_height: height,
                hop: 0,
            }),
        );
    });
}

proptest! {
    #[test]
    fn prop_locator_spans_tip_to_genesis(top in arb_top_height()) {
        let heights = short_history_heights(top);

        prop_assert!(!heights.is_empty());
        prop_assert_eq!(heights[0], top);
        prop_assert_eq!(*heights.last().unwrap(), 0);
    }

    #[test]
    fn prop_locator_strictly_decreasing(top in arb_top_height()) {
        let heights = short_history_heights(top);

        for pair in heights.windows(2) {
            prop_assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn prop_locator_head_is_dense(top in 11u64..=2_000_000u64) {
        let heights = short_history_heights(top);

        // Ten dense entries plus the first strided one are consecutive.
        for (index, height) in heights.iter().take(11).enumerate() {
            prop_assert_eq!(*height, top - index as u64);
        }
    }

    #[test]
    fn prop_locator_is_logarithmically_small(top in arb_top_height()) {
        let heights = short_history_heights(top);

        // Dense head plus one entry per stride doubling plus genesis.
        prop_assert!(heights.len() as u64 <= 12 + 64);
    }

    #[test]
    fn prop_observed_height_tracks_maximum_of_rising_reports(
        reports in prop::collection::vec((0usize..4, 1u64..100_000u64), 1..40)
    ) {
        let node = TestNode::new();
        let peers: Vec<PeerId> = (0u8..4).map(|s| node.endpoint.add_peer(s + 10, false)).collect();
        let mut per_peer_max = [0u64; 4];
        let mut fed_any = false;

        for (slot, height) in reports {
            // Keep each peer's reports strictly rising; retreat behavior is
            // covered separately.
            if height > per_peer_max[slot] {
                feed_height(&node, &peers[slot], height);
                per_peer_max[slot] = height;
                fed_any = true;
            }
        }

        prop_assume!(fed_any);
        let expected = *per_peer_max.iter().max().unwrap();
        prop_assert_eq!(node.handler.observed_height(), expected);

        // The aggregate never undercuts any live peer's report.
        for max in per_peer_max {
            prop_assert!(node.handler.observed_height() >= max);
        }
    }

    #[test]
    fn prop_dominant_retreat_falls_back_to_best_of_the_rest(
        best in 1_000u64..10_000u64,
        others in prop::collection::vec(1u64..1_000u64, 0..3),
        retreat in 1u64..1_000u64,
    ) {
        let node = TestNode::new();
        let dominant = node.endpoint.add_peer(10, false);
        feed_height(&node, &dominant, best);

        let mut expected = 0u64;
        for (index, height) in others.iter().enumerate() {
            let peer = node.endpoint.add_peer(11 + index as u8, false);
            feed_height(&node, &peer, *height);
            expected = expected.max(*height);
        }
        prop_assert_eq!(node.handler.observed_height(), best);

        // The dominant reporter retreats below everyone it used to beat.
        feed_height(&node, &dominant, retreat);

        prop_assert_eq!(node.handler.observed_height(), expected);
    }
}
