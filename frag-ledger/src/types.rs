//! Core types for the ledger
//!
//! Persisted rows (`Mother`, `Frag`, `JournalEntry`, `Fan`, `ShareSnapshot`)
//! are stored with bincode, so they avoid serde attributes that need
//! self-describing formats. Request types (`NewItem`, `GiveRequest`, ...)
//! arrive as JSON from the request layer.

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Status recorded on a frag that was handed off in full
pub const STATUS_TRANSFERRED: &str = "transferred";

/// Numeric user identifier, resolved by the identity directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Create new user ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Big-endian key bytes
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a mother colony
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    /// Small-polyp stony
    Sps,
    /// Large-polyp stony
    Lps,
    /// Soft coral
    Soft,
    /// Zoanthids and palythoa
    Zoanthid,
    /// Anemones
    Anemone,
    /// Macroalgae
    Macroalgae,
    /// Anything else
    Other,
}

impl ItemType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Sps => "sps",
            ItemType::Lps => "lps",
            ItemType::Soft => "soft",
            ItemType::Zoanthid => "zoanthid",
            ItemType::Anemone => "anemone",
            ItemType::Macroalgae => "macroalgae",
            ItemType::Other => "other",
        }
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sps" => Ok(ItemType::Sps),
            "lps" => Ok(ItemType::Lps),
            "soft" => Ok(ItemType::Soft),
            "zoanthid" => Ok(ItemType::Zoanthid),
            "anemone" => Ok(ItemType::Anemone),
            "macroalgae" => Ok(ItemType::Macroalgae),
            "other" => Ok(ItemType::Other),
            other => Err(Error::Validation(format!("unknown type '{}'", other))),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility rule of a lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rule {
    /// Anyone, including anonymous viewers
    Public,
    /// Signed-in community members
    Members,
    /// Holders of the lineage only
    Private,
}

impl Rule {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Public => "public",
            Rule::Members => "members",
            Rule::Private => "private",
        }
    }
}

impl FromStr for Rule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Rule::Public),
            "members" => Ok(Rule::Members),
            "private" => Ok(Rule::Private),
            other => Err(Error::Validation(format!("unknown rule '{}'", other))),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Journal entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Frag came into the holder's possession
    Acquired,
    /// Frag was handed off in full
    Gave,
    /// A split was cut from this frag
    Fragged,
    /// Mother attributes were edited
    Changed,
    /// Frag died
    Rip,
    /// Lineage was imported from an external thread
    Imported,
    /// Progress update (usually a new picture)
    Update,
    /// Doing well
    Good,
    /// Doing badly
    Bad,
}

/// Care attributes of a mother
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CareAttributes {
    /// Light requirement
    pub light: Option<String>,
    /// Flow requirement
    pub flow: Option<String>,
    /// Hardiness
    pub hardiness: Option<String>,
    /// Growth rate
    pub growth_rate: Option<String>,
}

/// How the mother was acquired
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Vendor or person it came from
    pub source: Option<String>,
    /// Purchase cost
    pub cost: Option<Decimal>,
    /// Size when acquired
    pub size: Option<String>,
}

/// Root record of one lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mother {
    /// Mother ID (UUIDv7)
    pub mother_id: Uuid,

    /// Creation time; orders the collection listing
    pub created_at: DateTime<Utc>,

    /// Display name
    pub name: String,

    /// Classification
    pub item_type: ItemType,

    /// Care attributes
    pub care: CareAttributes,

    /// Acquisition metadata
    pub acquisition: Acquisition,

    /// Visibility rule
    pub rule: Rule,

    /// External forum thread this lineage was imported from
    pub thread_id: Option<u64>,
}

/// One ownership instance in a lineage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frag {
    /// Frag ID (UUIDv7)
    pub frag_id: Uuid,

    /// Lineage this frag belongs to
    pub mother_id: Uuid,

    /// Current holder
    pub owner_id: UserId,

    /// When the holder got it
    pub date_acquired: DateTime<Utc>,

    /// Parent frag; `None` only for the root
    pub frag_of: Option<Uuid>,

    /// Opaque upload reference
    pub picture: Option<String>,

    /// Free-form notes
    pub notes: Option<String>,

    /// Remaining splits the holder offers
    pub frags_available: u32,

    /// Liveness flag; death is never a physical delete
    pub alive: bool,

    /// Optional status, e.g. "transferred"
    pub status: Option<String>,
}

impl Frag {
    /// Whether this is the lineage root
    pub fn is_root(&self) -> bool {
        self.frag_of.is_none()
    }

    /// Whether this frag was handed off in full
    pub fn is_transferred(&self) -> bool {
        self.status.as_deref() == Some(STATUS_TRANSFERRED)
    }
}

/// Append-only event on a frag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Entry ID (UUIDv7)
    pub journal_id: Uuid,

    /// Frag this entry belongs to
    pub frag_id: Uuid,

    /// Canonical UTC timestamp, millisecond precision
    pub timestamp: DateTime<Utc>,

    /// Entry type
    pub entry_type: EntryType,

    /// Opaque upload reference
    pub picture: Option<String>,

    /// Free-form notes
    pub notes: Option<String>,

    /// Written by the import replayer
    pub imported: bool,
}

impl JournalEntry {
    pub(crate) fn new(frag_id: Uuid, entry_type: EntryType, timestamp: DateTime<Utc>) -> Self {
        Self {
            journal_id: Uuid::now_v7(),
            frag_id,
            timestamp: canonical_utc(timestamp),
            entry_type,
            picture: None,
            notes: None,
            imported: false,
        }
    }

    pub(crate) fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub(crate) fn with_picture(mut self, picture: Option<String>) -> Self {
        self.picture = picture;
        self
    }

    pub(crate) fn imported(mut self, imported: bool) -> Self {
        self.imported = imported;
        self
    }
}

/// A user's "like" of a mother
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fan {
    /// Mother ID
    pub mother_id: Uuid,
    /// Fan
    pub user_id: UserId,
    /// When the like was recorded
    pub created_at: DateTime<Utc>,
}

/// Immutable public copy of a frag and its journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareSnapshot {
    /// Opaque random token
    pub share_id: String,

    /// Lowercase hex SHA-256 of `payload`
    pub hash: String,

    /// What was shared
    pub share_type: String,

    /// Canonical JSON of the shared content
    pub payload: String,

    /// When the snapshot was first written
    pub created_at: DateTime<Utc>,
}

/// Attributes for a new mother and its root frag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewItem {
    /// Holder of the root frag
    pub owner_id: Option<UserId>,
    /// Display name
    pub name: Option<String>,
    /// Classification, see [`ItemType`]
    pub item_type: Option<String>,
    /// Visibility rule, see [`Rule`]
    pub rule: Option<String>,
    /// Initial split counter of the root
    #[serde(default)]
    pub frags_available: i64,
    /// Defaults to now
    pub date_acquired: Option<DateTime<Utc>>,
    /// Care attributes
    #[serde(default)]
    pub care: CareAttributes,
    /// Acquisition metadata
    #[serde(default)]
    pub acquisition: Acquisition,
    /// Opaque upload reference
    pub picture: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
}

/// Request to split or transfer a frag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiveRequest {
    /// Source frag
    pub frag_of: Uuid,
    /// Recipient
    pub owner_id: UserId,
    /// Defaults to now
    pub date_acquired: Option<DateTime<Utc>>,
    /// Full hand-off instead of a split
    #[serde(default)]
    pub transfer: bool,
    /// Opaque upload reference for the new frag
    pub picture: Option<String>,
    /// Notes for the new frag
    pub notes: Option<String>,
}

impl GiveRequest {
    /// Split one frag off `frag_of` for `owner_id`
    pub fn split(frag_of: Uuid, owner_id: UserId) -> Self {
        Self {
            frag_of,
            owner_id,
            date_acquired: None,
            transfer: false,
            picture: None,
            notes: None,
        }
    }

    /// Hand `frag_of` to `owner_id` in full
    pub fn transfer(frag_of: Uuid, owner_id: UserId) -> Self {
        Self {
            transfer: true,
            ..Self::split(frag_of, owner_id)
        }
    }
}

/// Journal entry as submitted by a holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJournal {
    /// Frag the entry is about
    pub frag_id: Uuid,
    /// Entry type
    pub entry_type: EntryType,
    /// Defaults to now; any offset is normalized to UTC
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Opaque upload reference
    pub picture: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
}

/// Edits applied through the root frag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MotherEdit {
    /// New display name
    pub name: Option<String>,
    /// New classification
    pub item_type: Option<String>,
    /// New visibility rule
    pub rule: Option<String>,
    /// Replacement care attributes
    pub care: Option<CareAttributes>,
    /// Replacement acquisition metadata
    pub acquisition: Option<Acquisition>,
}

/// Collection filters; `None` means unconstrained
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionFilters {
    /// Only mothers of this type
    pub item_type: Option<ItemType>,
    /// Only mothers where this user holds a live frag
    pub owner_id: Option<UserId>,
    /// Case-insensitive substring of the name
    pub name: Option<String>,
}

/// One mother in a collection page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRow {
    /// The mother
    pub mother: Mother,
    /// Root frag ID
    pub root_frag_id: Uuid,
    /// Root holder
    pub root_owner_id: UserId,
    /// Root holder's display name
    pub root_owner_name: String,
    /// Requester holds the root
    pub owns_root: bool,
    /// Sum of split counters over live non-root frags
    pub frags_available: u64,
    /// Requester holds a live non-root frag
    pub owns_live_child: bool,
    /// Number of live non-root frags
    pub live_child_count: usize,
    /// Number of fans
    pub fan_count: usize,
    /// Requester is a fan
    pub is_fan: bool,
}

/// Normalize a timestamp to canonical UTC at millisecond precision
pub fn canonical_utc<Tz: chrono::TimeZone>(ts: DateTime<Tz>) -> DateTime<Utc> {
    let utc = ts.with_timezone(&Utc);
    DateTime::from_timestamp_millis(utc.timestamp_millis()).unwrap_or(utc)
}
