//! VeilNote client SDK: a client-held private ledger.
//!
//! The wallet's token balance is a set of cryptographic note commitments,
//! synchronized against on-chain events through a trusted encryption
//! service (TES). This crate owns the commitment store and its coin
//! selection, the append-only history of note lifecycle transitions, the
//! block-height sync cursor, the encrypted view-account key material, and
//! the authenticated TES session protocol with its retry discipline.

pub mod auth;
pub mod commitments;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod history;
pub mod keys;
pub mod kv;
pub mod serializer;
pub mod sync;
pub mod tes;

pub use commitments::{CoinSelection, Commitment, CommitmentStore};
pub use config::SdkConfig;
pub use context::LedgerContext;
pub use error::{Result, SdkError};
pub use events::{EventHub, LedgerEvent, SyncFailure};
pub use history::{HistoryLedger, HistoryRecord, HistoryStatus};
pub use keys::{LocalWalletSigner, ViewAccount, ViewAccountManager, WalletSigner};
pub use kv::{LedgerDb, WriteBatch};
pub use serializer::TaskSerializer;
pub use sync::SyncTracker;
pub use tes::{MetaTransaction, TesClient, TesEvent, TesEventKind};
