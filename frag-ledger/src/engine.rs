//! Ownership transfer engine
//!
//! Every operation here is one [`LedgerTxn`](crate::storage::LedgerTxn):
//! rows that gate the mutation are read with `*_for_update`, conditions are
//! re-checked under that lock, and all writes (rows, indices, journal
//! entries) commit together. Any `?` before `commit` drops the transaction
//! and rolls every partial write back.
//!
//! Notifications go out only after a successful commit.

use crate::{
    identity::{resolve_or_placeholder, IdentityDirectory},
    metrics::Metrics,
    notify::{Notification, NotifierHandle},
    storage::Storage,
    types::{
        canonical_utc, EntryType, Fan, Frag, GiveRequest, ItemType, JournalEntry, Mother,
        MotherEdit, NewItem, NewJournal, Rule, UserId, STATUS_TRANSFERRED,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Who is driving a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A holder acting now
    Interactive,
    /// The import replayer, back-dated to the historical entry
    Imported(DateTime<Utc>),
}

impl Origin {
    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Origin::Interactive => Utc::now(),
            Origin::Imported(at) => *at,
        }
    }

    fn is_imported(&self) -> bool {
        matches!(self, Origin::Imported(_))
    }
}

/// Attributes of a new item after validation
#[derive(Debug, Clone)]
pub(crate) struct ValidatedItem {
    owner_id: UserId,
    name: String,
    item_type: ItemType,
    rule: Rule,
    frags_available: u32,
    item: NewItem,
}

impl NewItem {
    pub(crate) fn validate(&self) -> Result<ValidatedItem> {
        let owner_id = self
            .owner_id
            .ok_or_else(|| Error::Validation("owner is required".into()))?;
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Validation("name is required".into()))?
            .to_string();
        let item_type = self
            .item_type
            .as_deref()
            .ok_or_else(|| Error::Validation("type is required".into()))?
            .parse()?;
        let rule = self
            .rule
            .as_deref()
            .ok_or_else(|| Error::Validation("rule is required".into()))?
            .parse()?;
        let frags_available = u32::try_from(self.frags_available).map_err(|_| {
            Error::Validation(format!("invalid frags available: {}", self.frags_available))
        })?;

        Ok(ValidatedItem {
            owner_id,
            name,
            item_type,
            rule,
            frags_available,
            item: self.clone(),
        })
    }
}

/// Transactional create / split / transfer / kill / journal operations
pub struct TransferEngine {
    storage: Arc<Storage>,
    identity: Arc<dyn IdentityDirectory>,
    notifier: Option<NotifierHandle>,
    metrics: Metrics,
}

impl TransferEngine {
    /// Create engine
    pub fn new(
        storage: Arc<Storage>,
        identity: Arc<dyn IdentityDirectory>,
        notifier: Option<NotifierHandle>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            identity,
            notifier,
            metrics,
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn emit(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(notification);
        }
    }

    fn observe(&self, started: Instant) {
        self.metrics
            .record_txn_duration(started.elapsed().as_secs_f64());
    }

    /// Create a mother and its root frag
    pub fn insert_item(&self, attrs: &NewItem) -> Result<(Uuid, Uuid)> {
        let item = attrs.validate()?;
        self.insert_validated(&item, None, Origin::Interactive)
    }

    pub(crate) fn insert_validated(
        &self,
        item: &ValidatedItem,
        thread_id: Option<u64>,
        origin: Origin,
    ) -> Result<(Uuid, Uuid)> {
        let started = Instant::now();
        let now = Utc::now();
        let at = origin.timestamp();

        let mother = Mother {
            mother_id: Uuid::now_v7(),
            created_at: now,
            name: item.name.clone(),
            item_type: item.item_type,
            care: item.item.care.clone(),
            acquisition: item.item.acquisition.clone(),
            rule: item.rule,
            thread_id,
        };
        let root = Frag {
            frag_id: Uuid::now_v7(),
            mother_id: mother.mother_id,
            owner_id: item.owner_id,
            date_acquired: item.item.date_acquired.map(canonical_utc).unwrap_or(at),
            frag_of: None,
            picture: item.item.picture.clone(),
            notes: item.item.notes.clone(),
            frags_available: item.frags_available,
            alive: true,
            status: None,
        };
        let entry_type = if origin.is_imported() {
            EntryType::Imported
        } else {
            EntryType::Acquired
        };
        let entry = JournalEntry::new(root.frag_id, entry_type, at)
            .with_picture(root.picture.clone())
            .imported(origin.is_imported());

        let txn = self.storage.begin();
        if let Some(thread_id) = thread_id {
            if !txn.claim_thread(thread_id, mother.mother_id)? {
                return Err(Error::ImportValidation(format!(
                    "thread {} was already imported",
                    thread_id
                )));
            }
        }
        txn.insert_mother(&mother)?;
        txn.insert_frag(&root)?;
        txn.insert_journal(&entry)?;
        txn.commit()?;

        self.observe(started);
        self.metrics.items_inserted.inc();
        self.metrics.record_journals(1);
        tracing::info!(
            mother_id = %mother.mother_id,
            frag_id = %root.frag_id,
            owner_id = %root.owner_id,
            frags_available = root.frags_available,
            "Item inserted"
        );

        self.emit(Notification::ItemAdded {
            mother_id: mother.mother_id,
            frag_id: root.frag_id,
            owner_id: root.owner_id,
            name: mother.name.clone(),
        });

        Ok((mother.mother_id, root.frag_id))
    }

    /// Split (`transfer = false`) or hand off (`transfer = true`) a frag
    ///
    /// Returns the source's split counter as committed and the new frag ID.
    pub fn give_a_frag(&self, giver_id: UserId, request: &GiveRequest) -> Result<(u32, Uuid)> {
        self.give(giver_id, request, Origin::Interactive)
    }

    pub(crate) fn give(
        &self,
        giver_id: UserId,
        request: &GiveRequest,
        origin: Origin,
    ) -> Result<(u32, Uuid)> {
        if request.owner_id == giver_id {
            return Err(Error::InvalidRecipient("cannot give a frag to yourself".into()));
        }
        let recipient = resolve_or_placeholder(self.identity.as_ref(), request.owner_id);
        if !recipient.allowed {
            return Err(Error::InvalidRecipient(format!(
                "user {} may not receive frags",
                request.owner_id
            )));
        }

        let started = Instant::now();
        let at = origin.timestamp();
        let txn = self.storage.begin();

        let mut source = txn
            .frag_for_update(request.frag_of)?
            .filter(|f| f.owner_id == giver_id && f.alive)
            .ok_or(Error::NotFoundOrForbidden)?;

        // Historical imports replay gifts the old records never counted.
        if !request.transfer && !origin.is_imported() && source.frags_available == 0 {
            return Err(Error::NotFoundOrForbidden);
        }

        let child = Frag {
            frag_id: Uuid::now_v7(),
            mother_id: source.mother_id,
            owner_id: request.owner_id,
            date_acquired: request.date_acquired.map(canonical_utc).unwrap_or(at),
            frag_of: Some(source.frag_id),
            picture: request.picture.clone(),
            notes: request.notes.clone(),
            frags_available: 0,
            alive: true,
            status: None,
        };

        let source_entry = if request.transfer {
            source.alive = false;
            source.frags_available = 0;
            source.status = Some(STATUS_TRANSFERRED.to_string());
            EntryType::Gave
        } else {
            source.frags_available = source.frags_available.saturating_sub(1);
            EntryType::Fragged
        };

        txn.update_frag(&source)?;
        txn.insert_frag(&child)?;
        txn.insert_journal(
            &JournalEntry::new(source.frag_id, source_entry, at)
                .with_notes(format!("to {}", recipient.display_name))
                .imported(origin.is_imported()),
        )?;
        txn.insert_journal(
            &JournalEntry::new(child.frag_id, EntryType::Acquired, at)
                .with_picture(child.picture.clone())
                .imported(origin.is_imported()),
        )?;

        let remaining = txn
            .frag(source.frag_id)?
            .map(|f| f.frags_available)
            .ok_or_else(|| Error::IntegrityViolation("source vanished mid-transaction".into()))?;
        txn.commit()?;

        self.observe(started);
        self.metrics.record_give(request.transfer);
        self.metrics.record_journals(2);
        tracing::info!(
            source_frag_id = %source.frag_id,
            new_frag_id = %child.frag_id,
            giver_id = %giver_id,
            recipient_id = %request.owner_id,
            transfer = request.transfer,
            remaining,
            "Frag given"
        );

        self.emit(Notification::FragGiven {
            source_frag_id: source.frag_id,
            new_frag_id: child.frag_id,
            giver_id,
            recipient_id: request.owner_id,
            transfer: request.transfer,
        });

        Ok((remaining, child.frag_id))
    }

    /// Mark a frag dead; repeating the call is harmless
    pub fn mark_as_dead(&self, owner_id: UserId, frag_id: Uuid, status: Option<&str>) -> Result<()> {
        self.kill(owner_id, frag_id, status, Origin::Interactive)
    }

    pub(crate) fn kill(
        &self,
        owner_id: UserId,
        frag_id: Uuid,
        status: Option<&str>,
        origin: Origin,
    ) -> Result<()> {
        let started = Instant::now();
        let txn = self.storage.begin();

        let mut frag = txn
            .frag_for_update(frag_id)?
            .filter(|f| f.owner_id == owner_id)
            .ok_or(Error::NotFoundOrForbidden)?;

        // A dead frag keeps the status it died with
        if !frag.alive {
            tracing::debug!(frag_id = %frag_id, "Frag already dead");
            return Ok(());
        }

        frag.alive = false;
        frag.frags_available = 0;
        if let Some(status) = status {
            frag.status = Some(status.to_string());
        }
        txn.update_frag(&frag)?;
        txn.insert_journal(
            &JournalEntry::new(frag_id, EntryType::Rip, origin.timestamp())
                .imported(origin.is_imported()),
        )?;
        txn.commit()?;

        self.observe(started);
        self.metrics.deaths.inc();
        self.metrics.record_journals(1);
        tracing::info!(frag_id = %frag_id, owner_id = %owner_id, "Frag died");
        self.emit(Notification::FragDied { frag_id, owner_id });

        Ok(())
    }

    /// Append a journal entry to a frag the caller holds (or held last)
    pub fn add_journal(&self, owner_id: UserId, entry: &NewJournal) -> Result<JournalEntry> {
        let started = Instant::now();
        let txn = self.storage.begin();

        txn.frag_for_update(entry.frag_id)?
            .filter(|f| f.owner_id == owner_id)
            .ok_or(Error::NotFoundOrForbidden)?;

        let timestamp = entry.timestamp.map(canonical_utc).unwrap_or_else(Utc::now);
        let mut row = JournalEntry::new(entry.frag_id, entry.entry_type, timestamp)
            .with_picture(entry.picture.clone());
        row.notes = entry.notes.clone();

        txn.insert_journal(&row)?;
        txn.commit()?;

        self.observe(started);
        self.metrics.record_journals(1);
        tracing::info!(
            frag_id = %row.frag_id,
            journal_id = %row.journal_id,
            entry_type = ?row.entry_type,
            "Journal entry added"
        );

        self.emit(Notification::JournalUpdated {
            frag_id: row.frag_id,
            journal_id: row.journal_id,
            entry_type: row.entry_type,
        });

        Ok(row)
    }

    /// Set the split counter, clamped at zero; returns the committed value
    pub fn update_frags_available(&self, owner_id: UserId, frag_id: Uuid, new_value: i64) -> Result<u32> {
        let started = Instant::now();
        let txn = self.storage.begin();

        let mut frag = txn
            .frag_for_update(frag_id)?
            .filter(|f| f.owner_id == owner_id && f.alive)
            .ok_or(Error::NotFoundOrForbidden)?;

        frag.frags_available = new_value.clamp(0, i64::from(u32::MAX)) as u32;
        txn.update_frag(&frag)?;

        let value = txn
            .frag(frag_id)?
            .map(|f| f.frags_available)
            .ok_or_else(|| Error::IntegrityViolation("frag vanished mid-transaction".into()))?;
        txn.commit()?;

        self.observe(started);
        tracing::info!(frag_id = %frag_id, frags_available = value, "Split counter updated");
        Ok(value)
    }

    /// Replace the picture of a frag and journal it as an update
    pub fn update_picture(&self, owner_id: UserId, frag_id: Uuid, picture: &str) -> Result<()> {
        let started = Instant::now();
        let txn = self.storage.begin();

        let mut frag = txn
            .frag_for_update(frag_id)?
            .filter(|f| f.owner_id == owner_id && f.alive)
            .ok_or(Error::NotFoundOrForbidden)?;

        frag.picture = Some(picture.to_string());
        let entry = JournalEntry::new(frag_id, EntryType::Update, Utc::now())
            .with_picture(frag.picture.clone());
        txn.update_frag(&frag)?;
        txn.insert_journal(&entry)?;
        txn.commit()?;

        self.observe(started);
        self.metrics.record_journals(1);
        tracing::info!(frag_id = %frag_id, "Picture updated");

        self.emit(Notification::JournalUpdated {
            frag_id,
            journal_id: entry.journal_id,
            entry_type: EntryType::Update,
        });
        Ok(())
    }

    /// Edit mother attributes through its root frag
    pub fn edit_item(&self, owner_id: UserId, frag_id: Uuid, edit: &MotherEdit) -> Result<Mother> {
        let name = match edit.name.as_deref().map(str::trim) {
            Some("") => return Err(Error::Validation("name cannot be empty".into())),
            other => other.map(str::to_string),
        };
        let item_type: Option<ItemType> = edit.item_type.as_deref().map(str::parse::<ItemType>).transpose()?;
        let rule: Option<Rule> = edit.rule.as_deref().map(str::parse::<Rule>).transpose()?;

        let started = Instant::now();
        let txn = self.storage.begin();

        let root = txn
            .frag_for_update(frag_id)?
            .filter(|f| f.owner_id == owner_id && f.alive && f.is_root())
            .ok_or(Error::NotFoundOrForbidden)?;
        let mut mother = txn
            .mother_for_update(root.mother_id)?
            .ok_or_else(|| Error::IntegrityViolation(format!("root {} has no mother", frag_id)))?;

        if let Some(name) = name {
            mother.name = name;
        }
        if let Some(item_type) = item_type {
            mother.item_type = item_type;
        }
        if let Some(rule) = rule {
            mother.rule = rule;
        }
        if let Some(care) = &edit.care {
            mother.care = care.clone();
        }
        if let Some(acquisition) = &edit.acquisition {
            mother.acquisition = acquisition.clone();
        }

        let entry = JournalEntry::new(frag_id, EntryType::Changed, Utc::now());
        txn.update_mother(&mother)?;
        txn.insert_journal(&entry)?;
        txn.commit()?;

        self.observe(started);
        self.metrics.record_journals(1);
        tracing::info!(mother_id = %mother.mother_id, "Item edited");

        self.emit(Notification::JournalUpdated {
            frag_id,
            journal_id: entry.journal_id,
            entry_type: EntryType::Changed,
        });
        Ok(mother)
    }

    /// Like a mother; `false` if the user already was a fan
    pub fn add_fan(&self, mother_id: Uuid, user_id: UserId) -> Result<bool> {
        let txn = self.storage.begin();
        txn.mother_for_update(mother_id)?
            .ok_or(Error::NotFoundOrForbidden)?;

        if txn.fan_for_update(mother_id, user_id)?.is_some() {
            return Ok(false);
        }
        txn.put_fan(&Fan {
            mother_id,
            user_id,
            created_at: Utc::now(),
        })?;
        txn.commit()?;

        tracing::debug!(mother_id = %mother_id, user_id = %user_id, "Fan added");
        Ok(true)
    }

    /// Unlike a mother; `false` if the user was not a fan
    pub fn remove_fan(&self, mother_id: Uuid, user_id: UserId) -> Result<bool> {
        let txn = self.storage.begin();
        if txn.fan_for_update(mother_id, user_id)?.is_none() {
            return Ok(false);
        }
        txn.delete_fan(mother_id, user_id)?;
        txn.commit()?;

        tracing::debug!(mother_id = %mother_id, user_id = %user_id, "Fan removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{StaticDirectory, UserProfile};
    use crate::Config;
    use tempfile::TempDir;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    fn test_engine() -> (TransferEngine, Arc<StaticDirectory>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let directory = Arc::new(StaticDirectory::new());
        let engine = TransferEngine::new(storage, directory.clone(), None, Metrics::new().unwrap());
        (engine, directory, temp_dir)
    }

    fn item(frags_available: i64) -> NewItem {
        NewItem {
            owner_id: Some(ALICE),
            name: Some("Jason Fox Homewrecker".into()),
            item_type: Some("sps".into()),
            rule: Some("public".into()),
            frags_available,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_item_creates_root() {
        let (engine, _, _temp) = test_engine();
        let (mother_id, frag_id) = engine.insert_item(&item(3)).unwrap();

        let root = engine.storage.get_frag(frag_id).unwrap().unwrap();
        assert_eq!(root.mother_id, mother_id);
        assert!(root.is_root());
        assert!(root.alive);
        assert_eq!(root.frags_available, 3);

        let journal = engine.storage.journals_for_frag(frag_id).unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].entry_type, EntryType::Acquired);
        assert_eq!(engine.metrics.items_inserted.get(), 1);
    }

    #[test]
    fn test_insert_item_validation() {
        let (engine, _, _temp) = test_engine();

        let mut missing_name = item(1);
        missing_name.name = Some("   ".into());
        assert!(matches!(engine.insert_item(&missing_name), Err(Error::Validation(_))));

        let mut bad_rule = item(1);
        bad_rule.rule = Some("everyone".into());
        assert!(matches!(engine.insert_item(&bad_rule), Err(Error::Validation(_))));

        let mut bad_type = item(1);
        bad_type.item_type = None;
        assert!(matches!(engine.insert_item(&bad_type), Err(Error::Validation(_))));

        assert!(matches!(engine.insert_item(&item(-1)), Err(Error::Validation(_))));
        assert_eq!(engine.storage.mother_count().unwrap(), 0);
    }

    #[test]
    fn test_split_decrements_counter() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(2)).unwrap();

        let (remaining, child) = engine.give_a_frag(ALICE, &GiveRequest::split(root, BOB)).unwrap();
        assert_eq!(remaining, 1);

        let child = engine.storage.get_frag(child).unwrap().unwrap();
        assert_eq!(child.owner_id, BOB);
        assert_eq!(child.frag_of, Some(root));
        assert_eq!(child.frags_available, 0);
        assert!(child.alive);

        let source = engine.storage.get_frag(root).unwrap().unwrap();
        assert!(source.alive);
        assert_eq!(source.frags_available, 1);
        assert_eq!(
            engine.storage.journals_for_frag(root).unwrap()[0].entry_type,
            EntryType::Fragged
        );
    }

    #[test]
    fn test_split_with_zero_counter_refused() {
        let (engine, _, _temp) = test_engine();
        let (mother_id, root) = engine.insert_item(&item(0)).unwrap();

        let result = engine.give_a_frag(ALICE, &GiveRequest::split(root, BOB));
        assert!(matches!(result, Err(Error::NotFoundOrForbidden)));
        assert_eq!(engine.storage.frags_for_mother(mother_id).unwrap().len(), 1);
    }

    #[test]
    fn test_transfer_kills_source() {
        let (engine, _, _temp) = test_engine();
        let (mother_id, root) = engine.insert_item(&item(2)).unwrap();

        let (remaining, child) = engine.give_a_frag(ALICE, &GiveRequest::transfer(root, BOB)).unwrap();
        assert_eq!(remaining, 0);

        let source = engine.storage.get_frag(root).unwrap().unwrap();
        assert!(!source.alive);
        assert!(source.is_transferred());
        assert_eq!(source.frags_available, 0);

        let frags = engine.storage.frags_for_mother(mother_id).unwrap();
        let live: Vec<&Frag> = frags.iter().filter(|f| f.alive).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].frag_id, child);
        assert_eq!(engine.metrics.transfers.get(), 1);
    }

    #[test]
    fn test_give_requires_live_owned_source() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(2)).unwrap();
        let carol = UserId::new(3);

        // Not the holder
        let result = engine.give_a_frag(BOB, &GiveRequest::split(root, carol));
        assert!(matches!(result, Err(Error::NotFoundOrForbidden)));

        // Unknown frag
        let result = engine.give_a_frag(ALICE, &GiveRequest::split(Uuid::now_v7(), BOB));
        assert!(matches!(result, Err(Error::NotFoundOrForbidden)));

        // Dead frag
        engine.mark_as_dead(ALICE, root, None).unwrap();
        let result = engine.give_a_frag(ALICE, &GiveRequest::transfer(root, BOB));
        assert!(matches!(result, Err(Error::NotFoundOrForbidden)));
    }

    #[test]
    fn test_invalid_recipients() {
        let (engine, directory, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(2)).unwrap();

        let result = engine.give_a_frag(ALICE, &GiveRequest::split(root, ALICE));
        assert!(matches!(result, Err(Error::InvalidRecipient(_))));

        directory.insert(UserProfile {
            user_id: BOB,
            display_name: "bob".into(),
            visible: true,
            allowed: false,
        });
        let result = engine.give_a_frag(ALICE, &GiveRequest::split(root, BOB));
        assert!(matches!(result, Err(Error::InvalidRecipient(_))));

        assert_eq!(engine.storage.get_frag(root).unwrap().unwrap().frags_available, 2);
    }

    #[test]
    fn test_dead_frag_status_is_kept() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(1)).unwrap();
        engine.give_a_frag(ALICE, &GiveRequest::transfer(root, BOB)).unwrap();
        let journals_before = engine.storage.journals_for_frag(root).unwrap().len();

        engine.mark_as_dead(ALICE, root, Some("melted")).unwrap();

        let frag = engine.storage.get_frag(root).unwrap().unwrap();
        assert_eq!(frag.status.as_deref(), Some(STATUS_TRANSFERRED));
        let journals = engine.storage.journals_for_frag(root).unwrap();
        assert_eq!(journals.len(), journals_before);
        assert!(journals.iter().all(|j| j.entry_type != EntryType::Rip));
        assert_eq!(engine.metrics.deaths.get(), 0);
    }

    #[test]
    fn test_mark_as_dead_is_idempotent() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(4)).unwrap();

        engine.mark_as_dead(ALICE, root, Some("melted")).unwrap();
        engine.mark_as_dead(ALICE, root, None).unwrap();

        let frag = engine.storage.get_frag(root).unwrap().unwrap();
        assert!(!frag.alive);
        assert_eq!(frag.frags_available, 0);
        assert_eq!(frag.status.as_deref(), Some("melted"));

        let rips = engine
            .storage
            .journals_for_frag(root)
            .unwrap()
            .into_iter()
            .filter(|j| j.entry_type == EntryType::Rip)
            .count();
        assert_eq!(rips, 1);
        assert_eq!(engine.metrics.deaths.get(), 1);

        assert!(matches!(
            engine.mark_as_dead(BOB, root, None),
            Err(Error::NotFoundOrForbidden)
        ));
    }

    #[test]
    fn test_add_journal_normalizes_timestamp() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(0)).unwrap();

        let entry = engine
            .add_journal(
                ALICE,
                &NewJournal {
                    frag_id: root,
                    entry_type: EntryType::Good,
                    timestamp: Some(DateTime::parse_from_rfc3339("2020-06-01T12:30:00.987654-05:00").unwrap()),
                    picture: None,
                    notes: Some("colouring up".into()),
                },
            )
            .unwrap();

        assert_eq!(entry.timestamp.to_rfc3339(), "2020-06-01T17:30:00.987+00:00");
        let stored = engine.storage.journals_for_frag(root).unwrap();
        assert!(stored.contains(&entry));
    }

    #[test]
    fn test_add_journal_defaults_to_now() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(0)).unwrap();
        let before = Utc::now() - chrono::Duration::seconds(1);

        let entry = engine
            .add_journal(
                ALICE,
                &NewJournal {
                    frag_id: root,
                    entry_type: EntryType::Bad,
                    timestamp: None,
                    picture: None,
                    notes: None,
                },
            )
            .unwrap();
        assert!(entry.timestamp >= before);

        let foreign = engine.add_journal(
            BOB,
            &NewJournal {
                frag_id: root,
                entry_type: EntryType::Bad,
                timestamp: None,
                picture: None,
                notes: None,
            },
        );
        assert!(matches!(foreign, Err(Error::NotFoundOrForbidden)));
    }

    #[test]
    fn test_update_frags_available_clamps() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(1)).unwrap();

        assert_eq!(engine.update_frags_available(ALICE, root, 7).unwrap(), 7);
        assert_eq!(engine.update_frags_available(ALICE, root, -5).unwrap(), 0);
        assert_eq!(engine.storage.get_frag(root).unwrap().unwrap().frags_available, 0);
        assert!(matches!(
            engine.update_frags_available(BOB, root, 3),
            Err(Error::NotFoundOrForbidden)
        ));
    }

    #[test]
    fn test_edit_item_only_through_root() {
        let (engine, _, _temp) = test_engine();
        let (mother_id, root) = engine.insert_item(&item(1)).unwrap();
        let (_, child) = engine.give_a_frag(ALICE, &GiveRequest::split(root, BOB)).unwrap();

        let edit = MotherEdit {
            name: Some("JF Homewrecker".into()),
            rule: Some("members".into()),
            ..Default::default()
        };
        assert!(matches!(
            engine.edit_item(BOB, child, &edit),
            Err(Error::NotFoundOrForbidden)
        ));

        let mother = engine.edit_item(ALICE, root, &edit).unwrap();
        assert_eq!(mother.name, "JF Homewrecker");
        assert_eq!(mother.rule, Rule::Members);
        assert_eq!(engine.storage.get_mother(mother_id).unwrap().unwrap(), mother);

        let bad = MotherEdit {
            item_type: Some("tree".into()),
            ..Default::default()
        };
        assert!(matches!(engine.edit_item(ALICE, root, &bad), Err(Error::Validation(_))));
    }

    #[test]
    fn test_edit_after_transfer_refused() {
        let (engine, _, _temp) = test_engine();
        let (mother_id, root) = engine.insert_item(&item(1)).unwrap();
        engine.give_a_frag(ALICE, &GiveRequest::transfer(root, BOB)).unwrap();

        let edit = MotherEdit {
            name: Some("Renamed after handoff".into()),
            rule: Some("private".into()),
            ..Default::default()
        };
        assert!(matches!(
            engine.edit_item(ALICE, root, &edit),
            Err(Error::NotFoundOrForbidden)
        ));
        assert!(matches!(
            engine.update_picture(ALICE, root, "https://img.example/late.jpg"),
            Err(Error::NotFoundOrForbidden)
        ));

        let mother = engine.storage.get_mother(mother_id).unwrap().unwrap();
        assert_eq!(mother.name, "Jason Fox Homewrecker");
        assert_eq!(mother.rule, Rule::Public);
        assert!(engine.storage.get_frag(root).unwrap().unwrap().picture.is_none());
    }

    #[test]
    fn test_update_picture_journals() {
        let (engine, _, _temp) = test_engine();
        let (_, root) = engine.insert_item(&item(0)).unwrap();

        engine.update_picture(ALICE, root, "uploads/abc.jpg").unwrap();
        let frag = engine.storage.get_frag(root).unwrap().unwrap();
        assert_eq!(frag.picture.as_deref(), Some("uploads/abc.jpg"));

        let latest = &engine.storage.journals_for_frag(root).unwrap()[0];
        assert_eq!(latest.entry_type, EntryType::Update);
        assert_eq!(latest.picture.as_deref(), Some("uploads/abc.jpg"));
    }

    #[test]
    fn test_fans_are_unique() {
        let (engine, _, _temp) = test_engine();
        let (mother_id, _) = engine.insert_item(&item(0)).unwrap();

        assert!(engine.add_fan(mother_id, BOB).unwrap());
        assert!(!engine.add_fan(mother_id, BOB).unwrap());
        assert_eq!(engine.storage.fans_for_mother(mother_id).unwrap().len(), 1);

        assert!(engine.remove_fan(mother_id, BOB).unwrap());
        assert!(!engine.remove_fan(mother_id, BOB).unwrap());
        assert!(matches!(
            engine.add_fan(Uuid::now_v7(), BOB),
            Err(Error::NotFoundOrForbidden)
        ));
    }
}
