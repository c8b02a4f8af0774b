//! Historical import
//!
//! Reconstructs a lineage from an external trading thread. The batch is
//! validated in full before anything is written; replay then walks the
//! entries in order, tracking which frag each user currently holds, and
//! drives the same engine operations as interactive use, back-dated to the
//! entry date.

use crate::{
    engine::{Origin, TransferEngine},
    types::{GiveRequest, NewItem, UserId},
    Error, Result,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A lineage exported from an external thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    /// External thread ID; each thread imports once
    pub thread_id: u64,
    /// User who owned the original colony
    pub importer: UserId,
    /// Mother attributes; the owner is always the importer
    pub root: NewItem,
    /// History in the order it happened
    #[serde(default)]
    pub transactions: Vec<ImportTransaction>,
}

/// One historical entry, as exported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportTransaction {
    /// `gave`, `trans` or `rip`
    pub kind: String,
    /// RFC 3339 timestamp or `YYYY-MM-DD`
    pub date: Option<String>,
    /// Holder the entry starts from
    pub from: Option<UserId>,
    /// Recipient, for `gave` and `trans`
    pub to: Option<UserId>,
    /// Free-form notes
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of replaying one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ReplayOutcome {
    /// Entry applied; the frag it produced or killed
    Applied {
        /// Frag ID
        frag_id: Uuid,
    },
    /// Entry ignored
    Skipped {
        /// Why
        reason: String,
    },
}

/// What an import produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    /// New mother
    pub mother_id: Uuid,
    /// Root frag
    pub frag_id: Uuid,
    /// One outcome per transaction, in order
    pub outcomes: Vec<ReplayOutcome>,
}

impl ImportReport {
    /// Number of applied entries
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ReplayOutcome::Applied { .. }))
            .count()
    }

    /// Number of skipped entries
    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.applied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gave,
    Trans,
    Rip,
}

#[derive(Debug)]
struct ParsedEntry {
    kind: Kind,
    at: DateTime<Utc>,
    from: UserId,
    to: Option<UserId>,
    notes: Option<String>,
}

/// Parse an entry date: RFC 3339, or a bare date taken as midnight UTC
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn parse_entry(index: usize, tx: &ImportTransaction) -> Result<ParsedEntry> {
    let invalid = |what: &str| Error::ImportValidation(format!("entry {}: {}", index, what));

    let kind = match tx.kind.trim().to_ascii_lowercase().as_str() {
        "gave" => Kind::Gave,
        "trans" => Kind::Trans,
        "rip" => Kind::Rip,
        other => return Err(invalid(&format!("unknown kind '{}'", other))),
    };
    let raw_date = tx.date.as_deref().ok_or_else(|| invalid("missing date"))?;
    let at = parse_date(raw_date).ok_or_else(|| invalid(&format!("unparseable date '{}'", raw_date)))?;
    let from = tx.from.ok_or_else(|| invalid("missing from"))?;
    if kind != Kind::Rip && tx.to.is_none() {
        return Err(invalid("missing to"));
    }

    Ok(ParsedEntry {
        kind,
        at,
        from,
        to: tx.to,
        notes: tx.notes.clone(),
    })
}

/// Replays an import through the engine
pub struct ImportReplayer<'a> {
    engine: &'a TransferEngine,
}

impl<'a> ImportReplayer<'a> {
    /// Create replayer
    pub fn new(engine: &'a TransferEngine) -> Self {
        Self { engine }
    }

    /// Validate, insert the root, then replay every entry
    pub fn import(&self, request: &ImportRequest) -> Result<ImportReport> {
        let root = NewItem {
            owner_id: Some(request.importer),
            ..request.root.clone()
        };
        let item = root
            .validate()
            .map_err(|e| Error::ImportValidation(format!("root: {}", e)))?;
        let entries = request
            .transactions
            .iter()
            .enumerate()
            .map(|(i, tx)| parse_entry(i, tx))
            .collect::<Result<Vec<_>>>()?;

        let root_at = root.date_acquired.unwrap_or_else(Utc::now);
        let (mother_id, frag_id) =
            self.engine
                .insert_validated(&item, Some(request.thread_id), Origin::Imported(root_at))?;

        let mut holdings: HashMap<UserId, Uuid> = HashMap::new();
        holdings.insert(request.importer, frag_id);

        let mut outcomes = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let result = match holdings.get(&entry.from).copied() {
                Some(source) => match self.replay(entry, source, &mut holdings) {
                    Ok(frag_id) => Ok(frag_id),
                    Err(e) if e.is_client_error() => Err(e.to_string()),
                    Err(e) => return Err(e),
                },
                None => Err(format!("user {} holds no frag", entry.from)),
            };
            let outcome = match result {
                Ok(frag_id) => {
                    self.engine.metrics().import_applied.inc();
                    ReplayOutcome::Applied { frag_id }
                }
                Err(reason) => {
                    self.engine.metrics().import_skipped.inc();
                    tracing::warn!(
                        thread_id = request.thread_id,
                        index,
                        from = %entry.from,
                        reason = %reason,
                        "Import entry skipped"
                    );
                    ReplayOutcome::Skipped { reason }
                }
            };
            outcomes.push(outcome);
        }

        let report = ImportReport {
            mother_id,
            frag_id,
            outcomes,
        };
        tracing::info!(
            thread_id = request.thread_id,
            mother_id = %mother_id,
            applied = report.applied(),
            skipped = report.skipped(),
            "Import replayed"
        );
        Ok(report)
    }

    fn replay(
        &self,
        entry: &ParsedEntry,
        source: Uuid,
        holdings: &mut HashMap<UserId, Uuid>,
    ) -> Result<Uuid> {
        let origin = Origin::Imported(entry.at);

        match entry.kind {
            Kind::Gave | Kind::Trans => {
                let to = entry
                    .to
                    .ok_or_else(|| Error::ImportValidation("missing to".into()))?;
                let request = GiveRequest {
                    frag_of: source,
                    owner_id: to,
                    date_acquired: Some(entry.at),
                    transfer: entry.kind == Kind::Trans,
                    picture: None,
                    notes: entry.notes.clone(),
                };
                let (_, child) = self.engine.give(entry.from, &request, origin)?;
                if request.transfer {
                    holdings.remove(&entry.from);
                }
                holdings.insert(to, child);
                Ok(child)
            }
            Kind::Rip => {
                self.engine.kill(entry.from, source, None, origin)?;
                holdings.remove(&entry.from);
                Ok(source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(
            parse_date("2019-05-02").unwrap().to_rfc3339(),
            "2019-05-02T00:00:00+00:00"
        );
        assert_eq!(
            parse_date("2019-05-02T10:00:00-04:00").unwrap().to_rfc3339(),
            "2019-05-02T14:00:00+00:00"
        );
        assert!(parse_date("May 2nd").is_none());
    }

    #[test]
    fn test_parse_entry_rejections() {
        let ok = ImportTransaction {
            kind: "gave".into(),
            date: Some("2020-01-01".into()),
            from: Some(UserId::new(1)),
            to: Some(UserId::new(2)),
            notes: None,
        };
        assert!(parse_entry(0, &ok).is_ok());

        let missing_date = ImportTransaction { date: None, ..ok.clone() };
        let err = parse_entry(3, &missing_date).unwrap_err();
        assert!(matches!(err, Error::ImportValidation(ref m) if m.contains("entry 3")));

        let bad_kind = ImportTransaction { kind: "sold".into(), ..ok.clone() };
        assert!(parse_entry(0, &bad_kind).is_err());

        let missing_to = ImportTransaction { to: None, ..ok.clone() };
        assert!(parse_entry(0, &missing_to).is_err());

        let rip = ImportTransaction { kind: "RIP".into(), to: None, ..ok };
        assert_eq!(parse_entry(0, &rip).unwrap().kind, Kind::Rip);
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(ReplayOutcome::Skipped { reason: "x".into() }).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "x");
    }
}
