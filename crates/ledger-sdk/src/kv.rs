//! sled-backed persistence for the ledger.
//!
//! All partitioned state (commitments, history, sync cursors) lives in one
//! source tree named `<appPrefix>.source.<env>`; logical entities are key
//! prefixes within it. Keeping every entity in one tree lets a multi-entity
//! write (a spend touches commitments and history) go through a single
//! atomic `sled::Batch`. Encrypted account-data blobs live in a second tree.

use std::sync::Arc;

use crate::config::SdkConfig;
use crate::error::Result;

const ENTITY_SEPARATOR: u8 = b'/';

/// Handle on the local database. Cheap to clone.
#[derive(Clone)]
pub struct LedgerDb {
    db: sled::Db,
    source: sled::Tree,
    account_data: sled::Tree,
}

impl LedgerDb {
    pub fn open(config: &SdkConfig) -> Result<Self> {
        let db = sled::open(&config.db_path)?;
        let source = db.open_tree(config.source_tree_name())?;
        let account_data = db.open_tree(format!("{}.encodedAccountData", config.app_prefix))?;

        Ok(Self {
            db,
            source,
            account_data,
        })
    }

    /// A named entity view over the source tree.
    pub fn partition(&self, entity: &str) -> Partition {
        Partition {
            tree: self.source.clone(),
            prefix: format!("{}{}", entity, ENTITY_SEPARATOR as char),
        }
    }

    /// Applies a staged multi-entity batch atomically, then flushes so the
    /// write survives process death.
    pub fn apply(&self, batch: WriteBatch) -> Result<()> {
        self.source.apply_batch(batch.inner)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn put_account_blob(&self, key: &str, value: &str) -> Result<()> {
        self.account_data.insert(key.as_bytes(), value.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_account_blob(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .account_data
            .get(key.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    pub fn del_account_blob(&self, key: &str) -> Result<()> {
        self.account_data.remove(key.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}

/// Staged writes across any number of entities, applied as one atomic unit
/// via [`LedgerDb::apply`].
#[derive(Default)]
pub struct WriteBatch {
    inner: sled::Batch,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A partitioned map of string keys to string values. Integers are stored as
/// decimal strings so values beyond native numeric precision survive intact.
#[derive(Clone)]
pub struct Partition {
    tree: sled::Tree,
    prefix: String,
}

impl Partition {
    fn full_key(&self, key: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + key.len());
        out.extend_from_slice(self.prefix.as_bytes());
        out.extend_from_slice(key.as_bytes());
        out
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .tree
            .get(self.full_key(key))?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Returns the values found, preserving input order; misses are silently
    /// omitted.
    pub fn get_many(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.push(value);
            }
        }
        Ok(found)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.tree.contains_key(self.full_key(key))?)
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.tree.insert(self.full_key(key), value.as_bytes())?;
        Ok(())
    }

    /// Removes the entry, returning what was deleted.
    pub fn del(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .tree
            .remove(self.full_key(key))?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// All `(key, value)` pairs in the partition, in key order.
    pub fn entries_all(&self) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(self.prefix.as_bytes()) {
            let (k, v) = entry?;
            let key = String::from_utf8_lossy(&k[self.prefix.len()..]).into_owned();
            out.push((key, String::from_utf8_lossy(&v).into_owned()));
        }
        Ok(out)
    }

    /// All values in the partition, in key order.
    pub fn values_all(&self) -> Result<Vec<String>> {
        Ok(self.entries_all()?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn clear(&self) -> Result<()> {
        let keys: Vec<_> = self
            .tree
            .scan_prefix(self.prefix.as_bytes())
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    pub fn stage_put(&self, batch: &mut WriteBatch, key: &str, value: &str) {
        batch.inner.insert(self.full_key(key), value.as_bytes());
    }

    pub fn stage_del(&self, batch: &mut WriteBatch, key: &str) {
        batch.inner.remove(self.full_key(key));
    }
}

/// Opens a throwaway database for tests.
#[cfg(test)]
pub(crate) fn temp_db() -> (tempfile::TempDir, LedgerDb) {
    let dir = tempfile::tempdir().unwrap();
    let config = SdkConfig::default().with_db_path(dir.path().join("ledger"));
    let db = LedgerDb::open(&config).unwrap();
    (dir, db)
}

pub type SharedDb = Arc<LedgerDb>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_roundtrip() {
        let (_dir, db) = temp_db();
        let partition = db.partition("commitments");

        partition.put("1", "ten").unwrap();
        partition.put("2", "twenty").unwrap();

        assert_eq!(partition.get("1").unwrap(), Some("ten".to_string()));
        assert_eq!(partition.get("missing").unwrap(), None);
        assert_eq!(partition.values_all().unwrap(), vec!["ten", "twenty"]);

        assert_eq!(partition.del("1").unwrap(), Some("ten".to_string()));
        assert_eq!(partition.get("1").unwrap(), None);
    }

    #[test]
    fn test_partitions_are_isolated() {
        let (_dir, db) = temp_db();
        let commitments = db.partition("commitments");
        let history = db.partition("history");

        commitments.put("1", "a").unwrap();
        history.put("1", "b").unwrap();

        assert_eq!(commitments.get("1").unwrap(), Some("a".to_string()));
        assert_eq!(history.get("1").unwrap(), Some("b".to_string()));

        commitments.clear().unwrap();
        assert_eq!(commitments.get("1").unwrap(), None);
        assert_eq!(history.get("1").unwrap(), Some("b".to_string()));
    }

    #[test]
    fn test_get_many_preserves_input_order() {
        let (_dir, db) = temp_db();
        let partition = db.partition("commitments");
        partition.put("1", "a").unwrap();
        partition.put("2", "b").unwrap();
        partition.put("3", "c").unwrap();

        let found = partition
            .get_many(&["3".into(), "missing".into(), "1".into()])
            .unwrap();
        assert_eq!(found, vec!["c", "a"]);
    }

    #[test]
    fn test_batch_spans_partitions() {
        let (_dir, db) = temp_db();
        let commitments = db.partition("commitments");
        let history = db.partition("history");
        commitments.put("spent", "x").unwrap();

        let mut batch = WriteBatch::new();
        commitments.stage_del(&mut batch, "spent");
        commitments.stage_put(&mut batch, "change", "y");
        history.stage_put(&mut batch, "h1", "z");
        db.apply(batch).unwrap();

        assert_eq!(commitments.get("spent").unwrap(), None);
        assert_eq!(commitments.get("change").unwrap(), Some("y".to_string()));
        assert_eq!(history.get("h1").unwrap(), Some("z".to_string()));
    }
}
