//! Main ledger orchestration layer
//!
//! This module ties together storage, the transfer engine, the read-side
//! queries and the notifier into one handle.
//!
//! # Example
//!
//! ```no_run
//! use frag_ledger::{Config, Ledger, LogSink, NewItem, GiveRequest, UserId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> frag_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?.with_notifications(Arc::new(LogSink));
//!
//!     let (_, root) = ledger.insert_item(&NewItem {
//!         owner_id: Some(UserId::new(1)),
//!         name: Some("Rainbow acan".into()),
//!         item_type: Some("lps".into()),
//!         rule: Some("public".into()),
//!         frags_available: 2,
//!         ..Default::default()
//!     })?;
//!     ledger.give_a_frag(UserId::new(1), &GiveRequest::split(root, UserId::new(2)))?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    collection::CollectionPaginator,
    engine::TransferEngine,
    identity::{IdentityDirectory, StaticDirectory},
    import::{ImportReplayer, ImportReport, ImportRequest},
    lineage::{self, LineageTree},
    metrics::Metrics,
    notify::{spawn_notifier, NotificationSink, NotifierHandle},
    share::ShareDeduplicator,
    types::{
        CollectionFilters, CollectionRow, Frag, GiveRequest, JournalEntry, Mother, MotherEdit,
        NewItem, NewJournal, Rule, ShareSnapshot, UserId,
    },
    Config, Error, Result, Storage,
};
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Shared store
    storage: Arc<Storage>,

    /// Mutations
    engine: TransferEngine,

    /// Collection listing
    paginator: CollectionPaginator,

    /// Share snapshots
    shares: ShareDeduplicator,

    /// User lookup
    identity: Arc<dyn IdentityDirectory>,

    /// Notification fan-out, if enabled
    notifier: Option<NotifierHandle>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// Starts with an empty [`StaticDirectory`] and no notifications.
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;
        let identity: Arc<dyn IdentityDirectory> = Arc::new(StaticDirectory::new());

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = %config.data_dir.display(),
            "Ledger opened"
        );

        Ok(Self {
            engine: TransferEngine::new(storage.clone(), identity.clone(), None, metrics.clone()),
            paginator: CollectionPaginator::new(
                storage.clone(),
                identity.clone(),
                config.collection.page_size,
            ),
            shares: ShareDeduplicator::new(storage.clone(), config.shares.clone(), metrics.clone()),
            storage,
            identity,
            notifier: None,
            metrics,
            config,
        })
    }

    /// Use an external identity directory
    pub fn with_identity(mut self, identity: Arc<dyn IdentityDirectory>) -> Self {
        self.identity = identity;
        self.rebuild();
        self
    }

    /// Start the notifier actor; must be called inside a Tokio runtime
    ///
    /// No-op when `notifications.enabled` is false.
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        if self.config.notifications.enabled {
            self.notifier = Some(spawn_notifier(
                sink,
                self.config.notifications.mailbox_capacity,
                self.metrics.clone(),
            ));
            self.rebuild();
        }
        self
    }

    fn rebuild(&mut self) {
        self.engine = TransferEngine::new(
            self.storage.clone(),
            self.identity.clone(),
            self.notifier.clone(),
            self.metrics.clone(),
        );
        self.paginator = CollectionPaginator::new(
            self.storage.clone(),
            self.identity.clone(),
            self.config.collection.page_size,
        );
    }

    // Mutations

    /// Create a mother and its root frag
    pub fn insert_item(&self, attrs: &NewItem) -> Result<(Uuid, Uuid)> {
        self.engine.insert_item(attrs)
    }

    /// Split or transfer a frag
    pub fn give_a_frag(&self, giver_id: UserId, request: &GiveRequest) -> Result<(u32, Uuid)> {
        self.engine.give_a_frag(giver_id, request)
    }

    /// Mark a frag dead
    pub fn mark_as_dead(&self, owner_id: UserId, frag_id: Uuid, status: Option<&str>) -> Result<()> {
        self.engine.mark_as_dead(owner_id, frag_id, status)
    }

    /// Append a journal entry
    pub fn add_journal(&self, owner_id: UserId, entry: &NewJournal) -> Result<JournalEntry> {
        self.engine.add_journal(owner_id, entry)
    }

    /// Set the split counter
    pub fn update_frags_available(&self, owner_id: UserId, frag_id: Uuid, new_value: i64) -> Result<u32> {
        self.engine.update_frags_available(owner_id, frag_id, new_value)
    }

    /// Replace a frag's picture
    pub fn update_picture(&self, owner_id: UserId, frag_id: Uuid, picture: &str) -> Result<()> {
        self.engine.update_picture(owner_id, frag_id, picture)
    }

    /// Edit mother attributes through the root frag
    pub fn edit_item(&self, owner_id: UserId, frag_id: Uuid, edit: &MotherEdit) -> Result<Mother> {
        self.engine.edit_item(owner_id, frag_id, edit)
    }

    /// Like a mother
    pub fn add_fan(&self, mother_id: Uuid, user_id: UserId) -> Result<bool> {
        self.engine.add_fan(mother_id, user_id)
    }

    /// Unlike a mother
    pub fn remove_fan(&self, mother_id: Uuid, user_id: UserId) -> Result<bool> {
        self.engine.remove_fan(mother_id, user_id)
    }

    /// Replay a historical thread
    pub fn import(&self, request: &ImportRequest) -> Result<ImportReport> {
        ImportReplayer::new(&self.engine).import(request)
    }

    // Reads

    /// Mother by ID, subject to visibility
    pub fn get_mother(&self, viewer: UserId, mother_id: Uuid) -> Result<Mother> {
        let mother = self
            .storage
            .get_mother(mother_id)?
            .ok_or(Error::NotFoundOrForbidden)?;
        let frags = self.storage.frags_for_mother(mother_id)?;
        lineage::ensure_visible(&mother, &frags, viewer)?;
        Ok(mother)
    }

    /// Frag by ID; a frag of a private lineage is only readable by its owner
    pub fn get_frag(&self, viewer: UserId, frag_id: Uuid) -> Result<Frag> {
        let frag = self
            .storage
            .get_frag(frag_id)?
            .ok_or(Error::NotFoundOrForbidden)?;
        let mother = self.storage.get_mother(frag.mother_id)?.ok_or_else(|| {
            Error::IntegrityViolation(format!("frag {} points at missing mother", frag_id))
        })?;
        lineage::ensure_frag_visible(&mother, &frag, viewer)?;
        Ok(frag)
    }

    /// Journal of a frag, newest first
    pub fn journals_for_frag(&self, viewer: UserId, frag_id: Uuid) -> Result<Vec<JournalEntry>> {
        self.get_frag(viewer, frag_id)?;
        self.storage.journals_for_frag(frag_id)
    }

    /// Flat frag rows of a mother, root first
    pub fn select_frags_for_mother(&self, viewer: UserId, mother_id: Uuid) -> Result<Vec<Frag>> {
        lineage::select_frags_for_mother(&self.storage, viewer, mother_id)
    }

    /// Lineage tree of a mother
    pub fn lineage(&self, viewer: UserId, mother_id: Uuid) -> Result<LineageTree> {
        lineage::lineage_for_mother(&self.storage, viewer, mother_id)
    }

    /// One page of the collection
    pub fn select_collection_paged(
        &self,
        requester: UserId,
        rules: &[Rule],
        page: usize,
        filters: &CollectionFilters,
    ) -> Result<Vec<CollectionRow>> {
        self.paginator
            .select_collection_paged(requester, rules, page, filters)
    }

    // Shares

    /// Snapshot a frag and journal
    pub fn share_frag(&self, frag: &Frag, journals: &[JournalEntry]) -> Result<String> {
        self.shares.share_frag(frag, journals)
    }

    /// Load, check and snapshot a frag by ID
    pub fn share_frag_by_id(&self, viewer: UserId, frag_id: Uuid) -> Result<String> {
        let frag = self.get_frag(viewer, frag_id)?;
        let journals = self.storage.journals_for_frag(frag_id)?;
        self.shares.share_frag(&frag, &journals)
    }

    /// Snapshot by share ID
    pub fn get_share(&self, share_id: &str) -> Result<ShareSnapshot> {
        self.shares.get_share(share_id)
    }

    // Plumbing

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying store
    pub fn storage(&self) -> &Storage {
        self.engine.storage()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wait until queued notifications reached the sink
    pub async fn flush_notifications(&self) -> Result<()> {
        match &self.notifier {
            Some(notifier) => notifier.flush().await,
            None => Ok(()),
        }
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        if let Some(notifier) = &self.notifier {
            notifier.flush().await?;
            notifier.shutdown().await?;
        }
        tracing::info!("Ledger shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notification;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);
    const CAROL: UserId = UserId::new(3);

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, notification: &Notification) -> Result<()> {
            self.seen.lock().push(notification.clone());
            Ok(())
        }
    }

    fn create_test_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Ledger::open(config).unwrap(), temp_dir)
    }

    fn item(rule: &str) -> NewItem {
        NewItem {
            owner_id: Some(ALICE),
            name: Some("Rainbow acan".into()),
            item_type: Some("lps".into()),
            rule: Some(rule.into()),
            frags_available: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ledger_open_and_shutdown() {
        let (ledger, _temp) = create_test_ledger();
        let ledger = ledger.with_notifications(Arc::new(crate::notify::LogSink));
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_follow_commits() {
        let (ledger, _temp) = create_test_ledger();
        let sink = Arc::new(RecordingSink::default());
        let ledger = ledger.with_notifications(sink.clone());

        let (mother_id, root) = ledger.insert_item(&item("public")).unwrap();
        let (_, child) = ledger.give_a_frag(ALICE, &GiveRequest::split(root, BOB)).unwrap();
        // Refused: no notification
        assert!(ledger.give_a_frag(CAROL, &GiveRequest::split(root, BOB)).is_err());
        ledger.mark_as_dead(BOB, child, None).unwrap();
        ledger.flush_notifications().await.unwrap();

        let seen = sink.seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], Notification::ItemAdded { mother_id: m, .. } if m == mother_id));
        assert!(matches!(seen[1], Notification::FragGiven { transfer: false, .. }));
        assert!(matches!(seen[2], Notification::FragDied { frag_id, .. } if frag_id == child));

        ledger.shutdown().await.unwrap();
    }

    #[test]
    fn test_private_reads_hidden_from_outsiders() {
        let (ledger, _temp) = create_test_ledger();
        let (mother_id, root) = ledger.insert_item(&item("private")).unwrap();
        let (_, child) = ledger.give_a_frag(ALICE, &GiveRequest::split(root, BOB)).unwrap();

        assert!(ledger.get_mother(ALICE, mother_id).is_ok());
        assert_eq!(ledger.lineage(ALICE, mother_id).unwrap().len(), 2);
        assert!(ledger.get_frag(BOB, child).is_ok());
        assert!(ledger.journals_for_frag(BOB, child).is_ok());

        // Bob holds a child, which opens his own frag and nothing else
        assert!(matches!(ledger.get_frag(BOB, root), Err(Error::NotFoundOrForbidden)));
        assert!(matches!(ledger.journals_for_frag(BOB, root), Err(Error::NotFoundOrForbidden)));
        assert!(matches!(ledger.get_mother(BOB, mother_id), Err(Error::NotFoundOrForbidden)));
        assert!(matches!(ledger.lineage(BOB, mother_id), Err(Error::NotFoundOrForbidden)));
        assert!(matches!(
            ledger.select_frags_for_mother(BOB, mother_id),
            Err(Error::NotFoundOrForbidden)
        ));
        assert!(matches!(ledger.get_frag(ALICE, child), Err(Error::NotFoundOrForbidden)));

        assert!(matches!(ledger.get_mother(CAROL, mother_id), Err(Error::NotFoundOrForbidden)));
        assert!(matches!(ledger.get_frag(CAROL, root), Err(Error::NotFoundOrForbidden)));
        assert!(matches!(
            ledger.journals_for_frag(CAROL, root),
            Err(Error::NotFoundOrForbidden)
        ));
        assert!(matches!(
            ledger.share_frag_by_id(CAROL, root),
            Err(Error::NotFoundOrForbidden)
        ));
    }

    #[test]
    fn test_share_frag_by_id_dedupes() {
        let (ledger, _temp) = create_test_ledger();
        let (_, root) = ledger.insert_item(&item("public")).unwrap();

        let first = ledger.share_frag_by_id(CAROL, root).unwrap();
        let second = ledger.share_frag_by_id(BOB, root).unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.storage().share_count().unwrap(), 1);

        let snapshot = ledger.get_share(&first).unwrap();
        assert!(snapshot.payload.contains(&root.to_string()));
    }

    #[test]
    fn test_with_identity_resolves_names() {
        let (ledger, _temp) = create_test_ledger();
        let directory = Arc::new(StaticDirectory::new().with_user(ALICE, "reef_alice"));
        let ledger = ledger.with_identity(directory);

        ledger.insert_item(&item("public")).unwrap();
        let rows = ledger
            .select_collection_paged(BOB, &[Rule::Public], 1, &CollectionFilters::default())
            .unwrap();
        assert_eq!(rows[0].root_owner_name, "reef_alice");
    }
}
