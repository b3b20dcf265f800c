//! Test data generators for integration tests.
//!
//! Blocks handed to the stub consensus core use a fabricated blob layout:
//! the 32-byte block id followed by the 32-byte ids of its transactions.
//! `StubCore::parse_block` understands exactly this layout, so a blob of
//! any other length reads as malformed.

use nocturne_network::{BlockCompleteEntry, Hash};

/// Generate a deterministic 32-byte id from a seed.
pub fn test_id(seed: u8) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    bytes[31] = seed.wrapping_mul(7);
    Hash::from_bytes(bytes)
}

/// Genesis id shared by every test chain.
pub fn genesis_id() -> Hash {
    test_id(0x01)
}

/// Generate a block id with a block marker.
pub fn block_id(n: u8) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xB0; // 'B' for block
    bytes[1] = n;
    bytes[31] = n.wrapping_add(1);
    Hash::from_bytes(bytes)
}

/// Generate a transaction id with a transaction marker.
pub fn tx_id(n: u8) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xAA; // 'T' marker
    bytes[1] = n;
    bytes[31] = n.wrapping_mul(3);
    Hash::from_bytes(bytes)
}

/// Serialized transaction recognizable by the stub core.
pub fn tx_blob(n: u8) -> Vec<u8> {
    tx_id(n).as_bytes().to_vec()
}

/// Serialized block: id followed by declared transaction ids.
pub fn block_blob(id: Hash, tx_ids: &[Hash]) -> Vec<u8> {
    let mut blob = id.as_bytes().to_vec();
    for tx in tx_ids {
        blob.extend_from_slice(tx.as_bytes());
    }
    blob
}

/// A complete block entry whose declared and delivered transactions agree.
pub fn block_entry(id: Hash, tx_seeds: &[u8]) -> BlockCompleteEntry {
    let tx_ids: Vec<Hash> = tx_seeds.iter().map(|&n| tx_id(n)).collect();
    BlockCompleteEntry {
        block: block_blob(id, &tx_ids),
        txs: tx_seeds.iter().map(|&n| tx_blob(n)).collect(),
    }
}

/// A block entry with no transactions.
pub fn empty_block_entry(id: Hash) -> BlockCompleteEntry {
    block_entry(id, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(block_id(1), block_id(2));
        assert_ne!(block_id(1), tx_id(1));
        assert_ne!(genesis_id(), block_id(1));
    }

    #[test]
    fn test_block_blob_layout() {
        let entry = block_entry(block_id(1), &[1, 2]);
        assert_eq!(entry.block.len(), 3 * 32);
        assert_eq!(entry.txs.len(), 2);
        assert_eq!(&entry.block[..32], block_id(1).as_bytes());
    }
}
