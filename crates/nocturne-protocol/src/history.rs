//! Short chain history sampling.

/// Heights to sample for a chain locator, newest first.
///
/// The ten most recent blocks are taken densely, then the stride doubles
/// (back-offsets 11, 13, 17, 25, ...) until it runs past genesis; genesis
/// is always the final entry. A responder walks the resulting ids until it
/// finds one it knows, which bounds ancestor lookup to O(log height) ids
/// even on long forks.
pub fn short_history_heights(top_height: u64) -> Vec<u64> {
    let size = top_height + 1;
    let mut heights = Vec::new();
    let mut back_offset: u64 = 1;
    let mut step: u64 = 1;
    let mut taken = 0u32;
    let mut genesis_included = false;

    while back_offset < size {
        let height = size - back_offset;
        heights.push(height);
        if height == 0 {
            genesis_included = true;
        }
        if taken < 10 {
            back_offset += 1;
        } else {
            step *= 2;
            back_offset += step;
        }
        taken += 1;
    }

    if !genesis_included {
        heights.push(0);
    }
    heights
}
