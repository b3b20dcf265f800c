//! Protocol configuration.

use crate::BLOCKS_SYNCHRONIZING_DEFAULT_COUNT;

/// Protocol handler configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Maximum blocks moved from needed to requested per get-objects batch.
    pub blocks_sync_batch: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            blocks_sync_batch: BLOCKS_SYNCHRONIZING_DEFAULT_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_batch_size() {
        let config = ProtocolConfig::default();
        assert_eq!(config.blocks_sync_batch, 200);
    }
}
