//! Session-scoped wiring.
//!
//! One `LedgerContext` is built per unlocked session and passed to whatever
//! needs it; there are no module-level cached clients or hidden globals.
//! It also hosts the two flows that must cross component boundaries
//! atomically: applying a sync round and applying a spend.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::commitments::{Commitment, CommitmentStore};
use crate::config::SdkConfig;
use crate::error::Result;
use crate::events::{sync_failure_channel, EventHub, LedgerEvent, SyncFailureReceiver};
use crate::history::{HistoryLedger, HistoryRecord, HistoryStatus};
use crate::keys::ViewAccount;
use crate::kv::{LedgerDb, WriteBatch};
use crate::serializer::TaskSerializer;
use crate::sync::SyncTracker;
use crate::tes::{sort_events, TesClient, TesEvent, TesEventKind};

pub struct LedgerContext {
    config: SdkConfig,
    db: LedgerDb,
    view: Arc<ViewAccount>,
    serializer: Arc<TaskSerializer>,
    tes: TesClient,
    events: EventHub,
}

impl LedgerContext {
    /// Builds the context and hands back the receiver for degraded-sync
    /// reports.
    pub fn new(
        config: SdkConfig,
        db: LedgerDb,
        view: Arc<ViewAccount>,
    ) -> Result<(Self, SyncFailureReceiver)> {
        let serializer = Arc::new(TaskSerializer::new());
        let (sink, failures) = sync_failure_channel();
        let tes =
            TesClient::new(&config, view.clone(), serializer.clone())?.with_failure_sink(sink);

        Ok((
            Self {
                config,
                db,
                view,
                serializer,
                tes,
                events: EventHub::new(),
            },
            failures,
        ))
    }

    pub fn commitments(&self, token: &str) -> CommitmentStore {
        CommitmentStore::new(&self.db, &self.view.main_address, token)
    }

    pub fn history(&self, token: &str) -> HistoryLedger {
        HistoryLedger::new(&self.db, &self.view.main_address, token)
    }

    pub fn sync_tracker(&self, token: &str) -> SyncTracker {
        SyncTracker::new(&self.db, token, &self.config.initial_sync_block)
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn tes(&self) -> &TesClient {
        &self.tes
    }

    pub fn view(&self) -> &ViewAccount {
        &self.view
    }

    pub fn serializer(&self) -> &Arc<TaskSerializer> {
        &self.serializer
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// One sync round for `token`: pulls `[last_synced_block, current_block]`
    /// from the indexer, applies the resulting note changes in a single
    /// atomic batch, then advances the cursor to what the remote reported.
    /// A degraded pull echoes the from-block, so the cursor stays put.
    pub async fn sync_once(&self, token: &str, current_block: &str) -> Result<String> {
        let tracker = self.sync_tracker(token);
        let from_block = tracker.last_synced_block()?;

        let mut response = self
            .tes
            .sync_with_tes(&self.view.main_address, token, &from_block, current_block)
            .await?;

        if !response.events.is_empty() {
            sort_events(&mut response.events);
            // Canonical order is newest-first; replay applies oldest-first.
            let changed = self.apply_events(token, response.events.iter().rev())?;
            if changed {
                let balance = self.commitments(token).balance()?;
                self.events.emit(LedgerEvent::PrivateBalanceChange(balance));
            }
        }

        tracker.set_last_synced_block(&response.synced_block)?;
        info!(token, synced_block = %response.synced_block, "Sync round applied");
        Ok(response.synced_block)
    }

    fn apply_events<'a>(
        &self,
        token: &str,
        events: impl Iterator<Item = &'a TesEvent>,
    ) -> Result<bool> {
        let commitments = self.commitments(token);
        let history = self.history(token);

        let mut batch = WriteBatch::new();
        let mut records = Vec::new();
        let mut changed = false;
        // Notes added earlier in this pass. Staged writes are invisible to
        // store reads until the batch applies, so a note created and spent
        // within one sync range must be resolved from here.
        let mut staged: HashMap<String, Commitment> = HashMap::new();

        for event in events {
            match event.kind {
                TesEventKind::Added => {
                    let (value, s_value) = match (&event.value, &event.s_value) {
                        (Some(v), Some(s)) => (v.as_str(), s.as_str()),
                        _ => {
                            warn!(hash = %event.hash, "Added event without note data, skipping");
                            continue;
                        }
                    };
                    let note = Commitment::new(&event.hash, value, s_value);
                    commitments.stage_save(&mut batch, &note)?;
                    staged.insert(note.hash.clone(), note.clone());
                    records.push(HistoryRecord::new(
                        note,
                        HistoryStatus::Added,
                        event.transaction_hash.clone(),
                    ));
                    changed = true;
                }
                TesEventKind::Removed => {
                    let note = match staged.remove(&event.hash) {
                        Some(note) => note,
                        None => match commitments.find_one_safe(&event.hash)? {
                            Some(note) => note,
                            None => {
                                warn!(hash = %event.hash, "Removed event for unknown note, skipping");
                                continue;
                            }
                        },
                    };
                    // Later batch ops win, so this tombstones a same-pass add.
                    commitments.stage_delete(&mut batch, &event.hash);
                    records.push(HistoryRecord::new(
                        note,
                        HistoryStatus::Spent,
                        event.transaction_hash.clone(),
                    ));
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(false);
        }

        history.stage_add_many(&mut batch, &records)?;
        self.db.apply(batch)?;
        Ok(true)
    }

    /// Commits a spend: removes the consumed notes, inserts the change note,
    /// and appends the matching history entries, all in one batch so a crash
    /// mid-operation can never tear the ledger.
    pub fn apply_spend(
        &self,
        token: &str,
        spent: &[Commitment],
        change: Option<&Commitment>,
        transaction_hash: Option<String>,
    ) -> Result<()> {
        let commitments = self.commitments(token);
        let history = self.history(token);

        let mut batch = WriteBatch::new();
        let mut records = Vec::new();

        for note in spent {
            commitments.stage_delete(&mut batch, &note.hash);
            records.push(HistoryRecord::new(
                note.clone(),
                HistoryStatus::Spent,
                transaction_hash.clone(),
            ));
        }
        if let Some(note) = change {
            commitments.stage_save(&mut batch, note)?;
            records.push(HistoryRecord::new(
                note.clone(),
                HistoryStatus::Added,
                transaction_hash.clone(),
            ));
        }

        history.stage_add_many(&mut batch, &records)?;
        self.db.apply(batch)?;

        let balance = commitments.balance()?;
        self.events.emit(LedgerEvent::PrivateBalanceChange(balance));
        self.events.emit(LedgerEvent::OnchainBalanceChange);
        Ok(())
    }
}
