//! Frag Ledger
//!
//! Ownership ledger for propagated livestock. A mother colony is split into
//! frags; each frag is handed from holder to holder, and the full lineage is
//! kept as a tree rooted at the original colony.
//!
//! # Architecture
//!
//! - **Transactional engine**: every split, transfer and death is one RocksDB
//!   pessimistic transaction with the source row locked
//! - **Arena lineage**: trees are rebuilt from flat rows into an indexed arena
//! - **Keyset pages**: collection pages skip an explicit ID set, never an offset
//! - **Content-addressed shares**: identical snapshots share one ID
//!
//! # Invariants
//!
//! - A split counter never goes below zero
//! - A transfer leaves the source dead and the new frag live
//! - Every lineage has exactly one root and no orphans
//! - Notifications never roll back a committed write

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod import;
pub mod ledger;
pub mod lineage;
pub mod metrics;
pub mod notify;
pub mod share;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use identity::{IdentityDirectory, StaticDirectory, UserProfile};
pub use import::{ImportReport, ImportRequest, ImportTransaction, ReplayOutcome};
pub use ledger::Ledger;
pub use lineage::{LineageNode, LineageTree};
pub use notify::{LogSink, Notification, NotificationSink};
pub use storage::Storage;
pub use types::{
    CollectionFilters, CollectionRow, EntryType, Frag, GiveRequest, ItemType, JournalEntry,
    Mother, MotherEdit, NewItem, NewJournal, Rule, ShareSnapshot, UserId,
};
