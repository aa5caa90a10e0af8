//! Block-height synchronization cursor.
//!
//! One mutable cursor per token: the last block the sync loop has fully
//! processed. Block numbers are decimal strings end to end since chain
//! heights can outgrow native numeric precision. No monotonicity is
//! enforced here; the sync loop is the only writer and only ever advances.

use tracing::debug;

use crate::error::Result;
use crate::kv::{LedgerDb, Partition};

#[derive(Clone)]
pub struct SyncTracker {
    partition: Partition,
    token: String,
    floor: String,
}

impl SyncTracker {
    pub fn new(db: &LedgerDb, token: &str, floor: &str) -> Self {
        Self {
            partition: db.partition("sync"),
            token: token.to_string(),
            floor: floor.to_string(),
        }
    }

    /// The persisted cursor, or the configured floor if never set.
    pub fn last_synced_block(&self) -> Result<String> {
        Ok(self
            .partition
            .get(&self.token)?
            .unwrap_or_else(|| self.floor.clone()))
    }

    /// Unconditional overwrite. Callers are responsible for only advancing.
    pub fn set_last_synced_block(&self, block: &str) -> Result<()> {
        debug!(token = %self.token, block, "Advancing sync cursor");
        self.partition.put(&self.token, block)
    }

    /// Removes the cursor; subsequent reads fall back to the floor.
    pub fn clear(&self) -> Result<()> {
        self.partition.del(&self.token)?;
        Ok(())
    }
}

/// Numeric comparison of decimal block strings.
pub fn cmp_blocks(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
