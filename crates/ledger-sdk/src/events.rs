//! State-change notification.
//!
//! Explicit subscriptions over a broadcast channel instead of an ambient
//! event emitter. Event identities match the original wallet contract:
//! a private-balance change carries the new balance, an on-chain change
//! carries nothing and just means "re-fetch".

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    PrivateBalanceChange(u128),
    OnchainBalanceChange,
}

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget: no subscribers is not an error.
    pub fn emit(&self, event: LedgerEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!("No subscribers for event {:?}", event);
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Report of a sync that exhausted its retries and degraded instead of
/// propagating. The cursor was not advanced.
#[derive(Clone, Debug)]
pub struct SyncFailure {
    pub owner: String,
    pub token: String,
    pub from_block: String,
    pub to_block: String,
    pub error: String,
}

pub type SyncFailureSender = mpsc::UnboundedSender<SyncFailure>;
pub type SyncFailureReceiver = mpsc::UnboundedReceiver<SyncFailure>;

pub fn sync_failure_channel() -> (SyncFailureSender, SyncFailureReceiver) {
    mpsc::unbounded_channel()
}
