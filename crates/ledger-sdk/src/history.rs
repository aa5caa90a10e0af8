//! Append-only history of note lifecycle transitions.
//!
//! Entries form a doubly-linked chain (head = oldest, tail = newest); the
//! store persists head/tail id markers alongside. Traversal in either
//! direction is a linear walk, no secondary sorted index needed. `add` is
//! idempotent and reports duplicates via `false`, never an error.

use serde::{Deserialize, Serialize};

use crate::commitments::Commitment;
use crate::error::{Result, SdkError};
use crate::kv::{LedgerDb, Partition, WriteBatch};

const HEAD_MARKER: &str = "head";
const TAIL_MARKER: &str = "tail";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Added,
    Spent,
}

impl HistoryStatus {
    fn tag(self) -> &'static str {
        match self {
            HistoryStatus::Added => "added",
            HistoryStatus::Spent => "spent",
        }
    }
}

/// A snapshot of a commitment at a lifecycle transition. Never mutated,
/// never deleted except by a full reset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub commitment: Commitment,
    pub status: HistoryStatus,
    pub transaction_hash: Option<String>,
}

impl HistoryRecord {
    pub fn new(
        commitment: Commitment,
        status: HistoryStatus,
        transaction_hash: Option<String>,
    ) -> Self {
        // A note gets at most one record per status, so hash + status is a
        // stable unique id.
        let id = format!("{}:{}", commitment.hash, status.tag());
        Self {
            id,
            commitment,
            status,
            transaction_hash,
        }
    }
}

/// Chain node as persisted: the record plus its neighbor pointers.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChainEntry {
    record: HistoryRecord,
    prev: Option<String>,
    next: Option<String>,
}

#[derive(Clone)]
pub struct HistoryLedger {
    db: LedgerDb,
    entries: Partition,
    markers: Partition,
}

impl HistoryLedger {
    pub fn new(db: &LedgerDb, owner: &str, token: &str) -> Self {
        Self {
            db: db.clone(),
            entries: db.partition(&format!("history/{}/{}", owner, token)),
            markers: db.partition(&format!("history-meta/{}/{}", owner, token)),
        }
    }

    fn load_entry(&self, id: &str) -> Result<ChainEntry> {
        let raw = self
            .entries
            .get(id)?
            .ok_or_else(|| SdkError::NotFound(format!("History entry {}", id)))?;
        serde_json::from_str(&raw).map_err(|e| SdkError::Serialization(e.to_string()))
    }

    fn encode(entry: &ChainEntry) -> Result<String> {
        serde_json::to_string(entry).map_err(|e| SdkError::Serialization(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.markers.get(HEAD_MARKER)?.is_none() && self.markers.get(TAIL_MARKER)?.is_none())
    }

    pub fn has(&self, id: &str) -> Result<bool> {
        self.entries.contains(id)
    }

    /// Links the record as the new tail. Returns `false` without touching
    /// state when the id is already present.
    pub fn add(&self, record: HistoryRecord) -> Result<bool> {
        let mut batch = WriteBatch::new();
        let added = self.stage_add_many(&mut batch, std::slice::from_ref(&record))?;
        if added == 0 {
            return Ok(false);
        }
        self.db.apply(batch)?;
        Ok(true)
    }

    /// Stages a sequence of appends into `batch`, skipping duplicates, and
    /// returns how many were actually staged. Used by spend flows so history
    /// lands in the same atomic write as the commitment changes.
    pub fn stage_add_many(&self, batch: &mut WriteBatch, records: &[HistoryRecord]) -> Result<usize> {
        let mut tail = self.markers.get(TAIL_MARKER)?;
        let mut head = self.markers.get(HEAD_MARKER)?;
        // Entries modified within this staging pass, keyed by id. Staged
        // writes are invisible to reads until applied, so link state is
        // tracked here.
        let mut pending: std::collections::HashMap<String, ChainEntry> =
            std::collections::HashMap::new();
        let mut added = 0usize;

        for record in records {
            if pending.contains_key(&record.id) || self.has(&record.id)? {
                continue;
            }

            let entry = ChainEntry {
                record: record.clone(),
                prev: tail.clone(),
                next: None,
            };

            if let Some(tail_id) = &tail {
                let mut prior = match pending.get(tail_id) {
                    Some(e) => e.clone(),
                    None => self.load_entry(tail_id)?,
                };
                prior.next = Some(record.id.clone());
                pending.insert(tail_id.clone(), prior);
            }
            if head.is_none() {
                head = Some(record.id.clone());
            }
            tail = Some(record.id.clone());
            pending.insert(record.id.clone(), entry);
            added += 1;
        }

        if added == 0 {
            return Ok(0);
        }

        for (id, entry) in &pending {
            self.entries.stage_put(batch, id, &Self::encode(entry)?);
        }
        if let Some(head_id) = &head {
            self.markers.stage_put(batch, HEAD_MARKER, head_id);
        }
        if let Some(tail_id) = &tail {
            self.markers.stage_put(batch, TAIL_MARKER, tail_id);
        }
        Ok(added)
    }

    /// All records, most recent first: a tail-to-head walk over the chain.
    pub fn all(&self) -> Result<Vec<HistoryRecord>> {
        let mut out = Vec::new();
        let mut cursor = self.markers.get(TAIL_MARKER)?;
        while let Some(id) = cursor {
            let entry = self.load_entry(&id)?;
            cursor = entry.prev.clone();
            out.push(entry.record);
        }
        Ok(out)
    }

    /// Drops the chain and its markers.
    pub fn clean(&self) -> Result<()> {
        self.entries.clear()?;
        self.markers.clear()
    }
}
