//! Commitment (note) store and coin selection.
//!
//! A commitment is a cryptographic note identified by a field-element hash.
//! Commitments are immutable: spending deletes and replaces, never mutates
//! in place. The store is scoped to one `(owner, token)` pair.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};
use crate::kv::{LedgerDb, Partition, WriteBatch};

/// A private note. All numeric fields are decimal strings so values beyond
/// native precision round-trip exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    /// Field-element identifier from the commitment scheme.
    pub hash: String,
    /// Non-negative token amount.
    pub value: String,
    /// Blinding nonce, opaque to ledger logic.
    pub s_value: String,
}

impl Commitment {
    pub fn new(hash: &str, value: &str, s_value: &str) -> Self {
        Self {
            hash: hash.to_string(),
            value: value.to_string(),
            s_value: s_value.to_string(),
        }
    }

    pub fn amount(&self) -> Result<u128> {
        self.value
            .parse()
            .map_err(|_| SdkError::InvalidInput(format!("Bad commitment value: {}", self.value)))
    }
}

/// Outcome of coin selection. "Not enough funds" is a sentinel, not an
/// error: the caller decides what to surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoinSelection {
    /// `total >= target`; the excess becomes the caller's change note.
    Selected {
        records: Vec<Commitment>,
        total: u128,
    },
    Insufficient,
}

impl CoinSelection {
    pub fn total(&self) -> u128 {
        match self {
            CoinSelection::Selected { total, .. } => *total,
            CoinSelection::Insufficient => 0,
        }
    }
}

/// Compares decimal strings numerically: shorter first, then lexicographic.
/// Used as the deterministic tie-break among equal-value commitments.
fn cmp_decimal(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[derive(Clone)]
pub struct CommitmentStore {
    partition: Partition,
}

impl CommitmentStore {
    pub fn new(db: &LedgerDb, owner: &str, token: &str) -> Self {
        Self {
            partition: db.partition(&format!("commitments/{}/{}", owner, token)),
        }
    }

    fn encode(record: &Commitment) -> Result<String> {
        serde_json::to_string(record).map_err(|e| SdkError::Serialization(e.to_string()))
    }

    fn decode(raw: &str) -> Result<Commitment> {
        serde_json::from_str(raw).map_err(|e| SdkError::Serialization(e.to_string()))
    }

    /// Insert-or-overwrite by hash. Overwriting is not an error.
    pub fn save(&self, record: &Commitment) -> Result<()> {
        self.partition.put(&record.hash, &Self::encode(record)?)
    }

    pub fn save_many(&self, records: &[Commitment]) -> Result<()> {
        for record in records {
            self.save(record)?;
        }
        Ok(())
    }

    pub fn find_one(&self, hash: &str) -> Result<Commitment> {
        self.find_one_safe(hash)?
            .ok_or_else(|| SdkError::NotFound(format!("Commitment {}", hash)))
    }

    pub fn find_one_safe(&self, hash: &str) -> Result<Option<Commitment>> {
        match self.partition.get(hash)? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Returns the subset found, preserving input order; misses are omitted.
    pub fn find_many(&self, hashes: &[String]) -> Result<Vec<Commitment>> {
        self.partition
            .get_many(hashes)?
            .iter()
            .map(|raw| Self::decode(raw))
            .collect()
    }

    pub fn all(&self) -> Result<Vec<Commitment>> {
        self.partition
            .values_all()?
            .iter()
            .map(|raw| Self::decode(raw))
            .collect()
    }

    /// Removes and returns the deleted record, or `NotFound`.
    pub fn delete(&self, hash: &str) -> Result<Commitment> {
        match self.partition.del(hash)? {
            Some(raw) => Self::decode(&raw),
            None => Err(SdkError::NotFound(format!("Commitment {}", hash))),
        }
    }

    /// Best-effort batch removal; missing hashes are skipped.
    pub fn delete_many(&self, hashes: &[String]) -> Result<()> {
        for hash in hashes {
            self.partition.del(hash)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        self.partition.clear()
    }

    pub fn balance(&self) -> Result<u128> {
        let mut sum: u128 = 0;
        for record in self.all()? {
            sum = sum.saturating_add(record.amount()?);
        }
        Ok(sum)
    }

    /// Greedy ascending coin selection: accumulate from the smallest value
    /// upward until the running total covers `target`. Consolidates dust and
    /// bounds the number of notes consumed per spend without attempting an
    /// optimal subset-sum solve. Equal values tie-break by ascending hash so
    /// selection is deterministic.
    pub fn find_commitments(&self, target: u128) -> Result<CoinSelection> {
        let mut records: Vec<(u128, Commitment)> = self
            .all()?
            .into_iter()
            .map(|r| Ok((r.amount()?, r)))
            .collect::<Result<_>>()?;
        records.sort_by(|(va, a), (vb, b)| va.cmp(vb).then_with(|| cmp_decimal(&a.hash, &b.hash)));

        let mut selected = Vec::new();
        let mut total: u128 = 0;
        for (value, record) in records {
            if total >= target {
                break;
            }
            total = total.saturating_add(value);
            selected.push(record);
        }

        if total < target {
            return Ok(CoinSelection::Insufficient);
        }
        Ok(CoinSelection::Selected {
            records: selected,
            total,
        })
    }

    pub fn stage_save(&self, batch: &mut WriteBatch, record: &Commitment) -> Result<()> {
        self.partition
            .stage_put(batch, &record.hash, &Self::encode(record)?);
        Ok(())
    }

    pub fn stage_delete(&self, batch: &mut WriteBatch, hash: &str) {
        self.partition.stage_del(batch, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::temp_db;

    fn store(db: &LedgerDb) -> CommitmentStore {
        CommitmentStore::new(db, "0xowner", "0xtoken")
    }

    fn note(hash: &str, value: u128) -> Commitment {
        Commitment::new(hash, &value.to_string(), "7")
    }

    #[test]
    fn test_save_is_idempotent_upsert() {
        let (_dir, db) = temp_db();
        let store = store(&db);

        store.save(&note("1", 10)).unwrap();
        store.save(&note("1", 10)).unwrap();

        assert_eq!(store.all().unwrap().len(), 1);
        assert_eq!(store.find_one("1").unwrap().value, "10");
    }

    #[test]
    fn test_find_one_vs_find_one_safe() {
        let (_dir, db) = temp_db();
        let store = store(&db);

        assert!(matches!(
            store.find_one("none"),
            Err(SdkError::NotFound(_))
        ));
        assert_eq!(store.find_one_safe("none").unwrap(), None);
    }

    #[test]
    fn test_delete_roundtrip() {
        let (_dir, db) = temp_db();
        let store = store(&db);
        store.save_many(&[note("1", 10), note("2", 20)]).unwrap();

        store
            .delete_many(&["1".to_string(), "2".to_string()])
            .unwrap();
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_selection_picks_ascending_until_covered() {
        let (_dir, db) = temp_db();
        let store = store(&db);
        store
            .save_many(&[note("3", 30), note("1", 10), note("2", 20)])
            .unwrap();

        match store.find_commitments(25).unwrap() {
            CoinSelection::Selected { records, total } => {
                let hashes: Vec<_> = records.iter().map(|r| r.hash.as_str()).collect();
                assert_eq!(hashes, vec!["1", "2"]);
                assert_eq!(total, 30);
            }
            CoinSelection::Insufficient => panic!("expected a selection"),
        }
    }

    #[test]
    fn test_selection_total_matches_records() {
        let (_dir, db) = temp_db();
        let store = store(&db);
        store
            .save_many(&[note("5", 5), note("7", 7), note("9", 9), note("40", 40)])
            .unwrap();

        match store.find_commitments(20).unwrap() {
            CoinSelection::Selected { records, total } => {
                let sum: u128 = records.iter().map(|r| r.amount().unwrap()).sum();
                assert_eq!(sum, total);
                assert!(total >= 20);
            }
            CoinSelection::Insufficient => panic!("expected a selection"),
        }
    }

    #[test]
    fn test_selection_insufficient_is_sentinel() {
        let (_dir, db) = temp_db();
        let store = store(&db);
        store.save(&note("1", 5)).unwrap();

        let selection = store.find_commitments(100).unwrap();
        assert_eq!(selection, CoinSelection::Insufficient);
        assert_eq!(selection.total(), 0);
    }

    #[test]
    fn test_selection_tie_break_by_hash() {
        let (_dir, db) = temp_db();
        let store = store(&db);
        // Same value; "9" sorts before "10" numerically.
        store
            .save_many(&[note("10", 4), note("9", 4), note("100", 50)])
            .unwrap();

        match store.find_commitments(6).unwrap() {
            CoinSelection::Selected { records, .. } => {
                let hashes: Vec<_> = records.iter().map(|r| r.hash.as_str()).collect();
                assert_eq!(hashes, vec!["9", "10"]);
            }
            CoinSelection::Insufficient => panic!("expected a selection"),
        }
    }

    #[test]
    fn test_scopes_do_not_leak() {
        let (_dir, db) = temp_db();
        let a = CommitmentStore::new(&db, "0xowner", "0xtokenA");
        let b = CommitmentStore::new(&db, "0xowner", "0xtokenB");

        a.save(&note("1", 10)).unwrap();
        assert!(b.all().unwrap().is_empty());

        a.reset().unwrap();
        assert!(a.all().unwrap().is_empty());
    }
}
