//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `mothers` - Lineage roots (key: mother_id)
//! - `frags` - Ownership instances (key: frag_id)
//! - `journals` - Append-only journal entries (key: journal_id)
//! - `fans` - Likes (key: mother_id || user_id)
//! - `shares` - Immutable share snapshots (key: share_id)
//! - `indices` - Secondary indices, one tag byte per index:
//!   - `c` || !created_nanos || !mother_id -> mother_id (newest first)
//!   - `f` || mother_id || frag_id -> empty
//!   - `j` || frag_id || journal_id -> empty
//!   - `h` || hash -> share_id
//!   - `t` || thread_id -> mother_id
//!
//! All mutations go through [`LedgerTxn`], a pessimistic RocksDB
//! transaction. Rows read with `*_for_update` stay exclusively locked until
//! commit; dropping an uncommitted transaction rolls everything back.

use crate::{
    error::{Error, Result},
    types::{Fan, Frag, JournalEntry, Mother, ShareSnapshot, UserId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    SingleThreaded, Transaction, TransactionDB, TransactionDBOptions,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Column family names
const CF_MOTHERS: &str = "mothers";
const CF_FRAGS: &str = "frags";
const CF_JOURNALS: &str = "journals";
const CF_FANS: &str = "fans";
const CF_SHARES: &str = "shares";
const CF_INDICES: &str = "indices";

/// Index tags
const IDX_CREATED: u8 = b'c';
const IDX_MOTHER_FRAG: u8 = b'f';
const IDX_FRAG_JOURNAL: u8 = b'j';
const IDX_SHARE_HASH: u8 = b'h';
const IDX_THREAD: u8 = b't';

type Db = TransactionDB<SingleThreaded>;
type KvPair = (Box<[u8]>, Box<[u8]>);

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Db,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(config.rocksdb.lock_timeout_ms);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_MOTHERS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_FRAGS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_JOURNALS, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_FANS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_SHARES, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = Db::open_cf_descriptors(&db_opts, &txn_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB transaction store");

        Ok(Self { db })
    }

    // Column family options

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Rows are read back on every mutation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        self.db.get_cf(cf, key)?.map(|bytes| decode(&bytes)).transpose()
    }

    /// Forward scan over every key in `cf_name` starting with `prefix`
    fn scan_prefix(
        &self,
        cf_name: &str,
        prefix: Vec<u8>,
    ) -> Result<impl Iterator<Item = Result<KvPair>> + '_> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        Ok(iter
            .map(|item| item.map_err(Error::from))
            .take_while(move |item| match item {
                Ok((key, _)) => key.starts_with(&prefix),
                Err(_) => true,
            }))
    }

    /// Start a transaction
    pub fn begin(&self) -> LedgerTxn<'_> {
        LedgerTxn {
            storage: self,
            txn: self.db.transaction(),
        }
    }

    // Reads (no locks)

    /// Get mother by ID
    pub fn get_mother(&self, mother_id: Uuid) -> Result<Option<Mother>> {
        self.get_row(CF_MOTHERS, mother_id.as_bytes())
    }

    /// Get frag by ID
    pub fn get_frag(&self, frag_id: Uuid) -> Result<Option<Frag>> {
        self.get_row(CF_FRAGS, frag_id.as_bytes())
    }

    /// All frags of a mother, in index order
    pub fn frags_for_mother(&self, mother_id: Uuid) -> Result<Vec<Frag>> {
        let prefix = index_key(IDX_MOTHER_FRAG, &[mother_id.as_bytes()]);
        let mut frags = Vec::new();

        for item in self.scan_prefix(CF_INDICES, prefix)? {
            let (key, _) = item?;
            let frag_id = uuid_at(&key, 17)?;
            let frag = self.get_frag(frag_id)?.ok_or_else(|| {
                Error::IntegrityViolation(format!("index points at missing frag {}", frag_id))
            })?;
            frags.push(frag);
        }

        tracing::debug!(mother_id = %mother_id, count = frags.len(), "Loaded frags for mother");
        Ok(frags)
    }

    /// Journal of a frag, newest first
    pub fn journals_for_frag(&self, frag_id: Uuid) -> Result<Vec<JournalEntry>> {
        let prefix = index_key(IDX_FRAG_JOURNAL, &[frag_id.as_bytes()]);
        let mut entries = Vec::new();

        for item in self.scan_prefix(CF_INDICES, prefix)? {
            let (key, _) = item?;
            let journal_id = uuid_at(&key, 17)?;
            let entry: JournalEntry = self
                .get_row(CF_JOURNALS, journal_id.as_bytes())?
                .ok_or_else(|| {
                    Error::IntegrityViolation(format!(
                        "index points at missing journal {}",
                        journal_id
                    ))
                })?;
            entries.push(entry);
        }

        entries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.journal_id.cmp(&a.journal_id))
        });
        Ok(entries)
    }

    /// Mother IDs, newest creation time first
    pub fn mothers_newest_first(&self) -> Result<impl Iterator<Item = Result<Uuid>> + '_> {
        let iter = self.scan_prefix(CF_INDICES, vec![IDX_CREATED])?;
        Ok(iter.map(|item| {
            let (_, value) = item?;
            Uuid::from_slice(&value)
                .map_err(|e| Error::IntegrityViolation(format!("bad creation index: {}", e)))
        }))
    }

    /// Number of mothers
    pub fn mother_count(&self) -> Result<usize> {
        let mut count = 0;
        for id in self.mothers_newest_first()? {
            id?;
            count += 1;
        }
        Ok(count)
    }

    /// Fans of a mother
    pub fn fans_for_mother(&self, mother_id: Uuid) -> Result<Vec<Fan>> {
        let mut fans = Vec::new();
        for item in self.scan_prefix(CF_FANS, mother_id.as_bytes().to_vec())? {
            let (_, value) = item?;
            fans.push(decode(&value)?);
        }
        Ok(fans)
    }

    /// Get share snapshot by ID
    pub fn get_share(&self, share_id: &str) -> Result<Option<ShareSnapshot>> {
        self.get_row(CF_SHARES, share_id.as_bytes())
    }

    /// Number of share snapshots
    pub fn share_count(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.scan_prefix(CF_SHARES, Vec::new())? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Mother created from an external thread, if any
    pub fn mother_for_thread(&self, thread_id: u64) -> Result<Option<Uuid>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = index_key(IDX_THREAD, &[&thread_id.to_be_bytes()]);
        self.db
            .get_cf(cf, key)?
            .map(|bytes| uuid_at(&bytes, 0))
            .transpose()
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

/// One pessimistic transaction against the store
pub struct LedgerTxn<'a> {
    storage: &'a Storage,
    txn: Transaction<'a, Db>,
}

impl<'a> LedgerTxn<'a> {
    fn get_for_update<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.storage.cf_handle(cf_name)?;
        self.txn
            .get_for_update_cf(cf, key, true)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], row: &T) -> Result<()> {
        let cf = self.storage.cf_handle(cf_name)?;
        self.txn.put_cf(cf, key, bincode::serialize(row)?)?;
        Ok(())
    }

    fn put_index(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        self.txn.put_cf(cf, key, value)?;
        Ok(())
    }

    // Mothers

    /// Lock and read a mother
    pub fn mother_for_update(&self, mother_id: Uuid) -> Result<Option<Mother>> {
        self.get_for_update(CF_MOTHERS, mother_id.as_bytes())
    }

    /// Insert a new mother and its creation-order index entry
    pub fn insert_mother(&self, mother: &Mother) -> Result<()> {
        self.put(CF_MOTHERS, mother.mother_id.as_bytes(), mother)?;

        let nanos = mother.created_at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        let inverted_id: Vec<u8> = mother.mother_id.as_bytes().iter().map(|b| !b).collect();
        let key = index_key(IDX_CREATED, &[&(u64::MAX - nanos).to_be_bytes(), &inverted_id]);
        self.put_index(&key, mother.mother_id.as_bytes())
    }

    /// Overwrite an existing mother
    pub fn update_mother(&self, mother: &Mother) -> Result<()> {
        self.put(CF_MOTHERS, mother.mother_id.as_bytes(), mother)
    }

    /// Claim an external thread for a mother; `false` if already claimed
    pub fn claim_thread(&self, thread_id: u64, mother_id: Uuid) -> Result<bool> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        let key = index_key(IDX_THREAD, &[&thread_id.to_be_bytes()]);
        if self.txn.get_for_update_cf(cf, &key, true)?.is_some() {
            return Ok(false);
        }
        self.txn.put_cf(cf, &key, mother_id.as_bytes())?;
        Ok(true)
    }

    // Frags

    /// Lock and read a frag
    pub fn frag_for_update(&self, frag_id: Uuid) -> Result<Option<Frag>> {
        self.get_for_update(CF_FRAGS, frag_id.as_bytes())
    }

    /// Read a frag, including this transaction's own writes
    pub fn frag(&self, frag_id: Uuid) -> Result<Option<Frag>> {
        let cf = self.storage.cf_handle(CF_FRAGS)?;
        self.txn
            .get_cf(cf, frag_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Insert a new frag and index it under its mother
    pub fn insert_frag(&self, frag: &Frag) -> Result<()> {
        self.put(CF_FRAGS, frag.frag_id.as_bytes(), frag)?;
        let key = index_key(
            IDX_MOTHER_FRAG,
            &[frag.mother_id.as_bytes(), frag.frag_id.as_bytes()],
        );
        self.put_index(&key, &[])
    }

    /// Overwrite an existing frag
    pub fn update_frag(&self, frag: &Frag) -> Result<()> {
        self.put(CF_FRAGS, frag.frag_id.as_bytes(), frag)
    }

    // Journals

    /// Append a journal entry
    pub fn insert_journal(&self, entry: &JournalEntry) -> Result<()> {
        self.put(CF_JOURNALS, entry.journal_id.as_bytes(), entry)?;
        let key = index_key(
            IDX_FRAG_JOURNAL,
            &[entry.frag_id.as_bytes(), entry.journal_id.as_bytes()],
        );
        self.put_index(&key, &[])
    }

    // Fans

    /// Lock and read a fan row
    pub fn fan_for_update(&self, mother_id: Uuid, user_id: UserId) -> Result<Option<Fan>> {
        self.get_for_update(CF_FANS, &fan_key(mother_id, user_id))
    }

    /// Insert a fan row
    pub fn put_fan(&self, fan: &Fan) -> Result<()> {
        self.put(CF_FANS, &fan_key(fan.mother_id, fan.user_id), fan)
    }

    /// Delete a fan row
    pub fn delete_fan(&self, mother_id: Uuid, user_id: UserId) -> Result<()> {
        let cf = self.storage.cf_handle(CF_FANS)?;
        self.txn.delete_cf(cf, fan_key(mother_id, user_id))?;
        Ok(())
    }

    // Shares

    /// Lock the hash index entry and return the share it points at
    pub fn share_id_for_hash_for_update(&self, hash: &str) -> Result<Option<String>> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        let key = index_key(IDX_SHARE_HASH, &[hash.to_ascii_lowercase().as_bytes()]);
        self.txn
            .get_for_update_cf(cf, key, true)?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| Error::IntegrityViolation(format!("bad share index: {}", e)))
            })
            .transpose()
    }

    /// Lock a share ID slot; `true` if it is already taken
    pub fn share_exists_for_update(&self, share_id: &str) -> Result<bool> {
        let cf = self.storage.cf_handle(CF_SHARES)?;
        Ok(self
            .txn
            .get_for_update_cf(cf, share_id.as_bytes(), true)?
            .is_some())
    }

    /// Write a snapshot and its hash index entry
    pub fn insert_share(&self, snapshot: &ShareSnapshot) -> Result<()> {
        self.put(CF_SHARES, snapshot.share_id.as_bytes(), snapshot)?;
        let key = index_key(
            IDX_SHARE_HASH,
            &[snapshot.hash.to_ascii_lowercase().as_bytes()],
        );
        self.put_index(&key, snapshot.share_id.as_bytes())
    }

    /// Commit all writes atomically
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }
}

// Key helpers

fn index_key(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut key = vec![tag];
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

fn fan_key(mother_id: Uuid, user_id: UserId) -> Vec<u8> {
    let mut key = mother_id.as_bytes().to_vec();
    key.extend_from_slice(&user_id.to_be_bytes());
    key
}

fn uuid_at(bytes: &[u8], offset: usize) -> Result<Uuid> {
    bytes
        .get(offset..offset + 16)
        .and_then(|slice| Uuid::from_slice(slice).ok())
        .ok_or_else(|| Error::IntegrityViolation("malformed index key".to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
