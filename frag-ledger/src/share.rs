//! Public share snapshots
//!
//! A snapshot is the canonical JSON of a frag and its journal. Identical
//! content hashes to the same SHA-256 and resolves to the existing share ID,
//! so repeated shares never write a second snapshot.

use crate::{
    config::ShareConfig,
    metrics::Metrics,
    storage::Storage,
    types::{Frag, JournalEntry, ShareSnapshot},
    Error, Result,
};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Share type recorded for frag snapshots
pub const SHARE_TYPE_FRAG: &str = "frag";

#[derive(Serialize)]
struct FragPayload<'a> {
    frag: &'a Frag,
    journals: &'a [JournalEntry],
}

/// Canonical JSON: object keys sorted, no insignificant whitespace
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    // serde_json::Value maps are BTreeMaps, which sorts every object's keys.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Lowercase hex SHA-256
pub fn content_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Content-addressed share store
pub struct ShareDeduplicator {
    storage: Arc<Storage>,
    config: ShareConfig,
    metrics: Metrics,
}

impl ShareDeduplicator {
    /// Create deduplicator
    pub fn new(storage: Arc<Storage>, config: ShareConfig, metrics: Metrics) -> Self {
        Self {
            storage,
            config,
            metrics,
        }
    }

    /// Snapshot a frag and its journal; returns the share ID
    pub fn share_frag(&self, frag: &Frag, journals: &[JournalEntry]) -> Result<String> {
        let payload = canonical_json(&FragPayload { frag, journals })?;
        let hash = content_hash(&payload);

        let txn = self.storage.begin();
        if let Some(existing) = txn.share_id_for_hash_for_update(&hash)? {
            self.metrics.shares_deduplicated.inc();
            tracing::debug!(share_id = %existing, hash = %hash, "Share deduplicated");
            return Ok(existing);
        }

        let share_id = self.mint_id(|candidate| txn.share_exists_for_update(candidate))?;
        let snapshot = ShareSnapshot {
            share_id: share_id.clone(),
            hash,
            share_type: SHARE_TYPE_FRAG.to_string(),
            payload,
            created_at: Utc::now(),
        };
        txn.insert_share(&snapshot)?;
        txn.commit()?;

        self.metrics.shares_created.inc();
        tracing::info!(
            share_id = %share_id,
            frag_id = %frag.frag_id,
            hash = %snapshot.hash,
            "Share created"
        );
        Ok(share_id)
    }

    /// Fetch a snapshot by ID
    pub fn get_share(&self, share_id: &str) -> Result<ShareSnapshot> {
        self.storage
            .get_share(share_id)?
            .ok_or(Error::NotFoundOrForbidden)
    }

    fn mint_id<F>(&self, mut taken: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        let mut rng = rand::thread_rng();
        for attempt in 1..=self.config.max_id_attempts {
            let candidate: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(self.config.id_length)
                .map(char::from)
                .collect();
            if !taken(&candidate)? {
                return Ok(candidate);
            }
            tracing::warn!(attempt, "Share ID collision, retrying");
        }
        Err(Error::Concurrency(format!(
            "no free share ID after {} attempts",
            self.config.max_id_attempts
        )))
    }
}
