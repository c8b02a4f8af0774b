//! Collection listing
//!
//! Pages walk the creation index newest first. A page is resolved by keyset:
//! a bounding pass with the same filters collects the IDs of every earlier
//! page, and the outer pass skips exactly those IDs before taking a page.

use crate::{
    identity::{resolve_or_placeholder, IdentityDirectory},
    storage::Storage,
    types::{CollectionFilters, CollectionRow, Frag, Mother, Rule, UserId},
    Error, Result,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// A mother with its frag rows, loaded once per scan step
struct Candidate {
    mother: Mother,
    frags: Vec<Frag>,
}

impl Candidate {
    fn root(&self) -> Result<&Frag> {
        self.frags.iter().find(|f| f.is_root()).ok_or_else(|| {
            Error::IntegrityViolation(format!("mother {} has no root frag", self.mother.mother_id))
        })
    }
}

/// Paged collection queries
pub struct CollectionPaginator {
    storage: Arc<Storage>,
    identity: Arc<dyn IdentityDirectory>,
    page_size: usize,
}

impl CollectionPaginator {
    /// Create paginator
    pub fn new(storage: Arc<Storage>, identity: Arc<dyn IdentityDirectory>, page_size: usize) -> Self {
        Self {
            storage,
            identity,
            page_size,
        }
    }

    /// One page of the collection, pages numbered from 1
    pub fn select_collection_paged(
        &self,
        requester: UserId,
        rules: &[Rule],
        page: usize,
        filters: &CollectionFilters,
    ) -> Result<Vec<CollectionRow>> {
        if page == 0 {
            return Err(Error::Validation("page numbers start at 1".into()));
        }
        let needle = filters.name.as_deref().map(str::to_lowercase);

        let bound = (page - 1).saturating_mul(self.page_size);
        if bound > 0 && bound >= self.storage.mother_count()? {
            tracing::debug!(requester = %requester, page, "Collection page past the end");
            return Ok(Vec::new());
        }

        let mut earlier: HashSet<Uuid> = HashSet::new();
        if bound > 0 {
            for candidate in self.candidates()? {
                let candidate = candidate?;
                if self.matches(&candidate, requester, rules, filters, needle.as_deref())? {
                    earlier.insert(candidate.mother.mother_id);
                    if earlier.len() == bound {
                        break;
                    }
                }
            }
        }

        let mut rows = Vec::with_capacity(self.page_size);
        for candidate in self.candidates()? {
            if rows.len() == self.page_size {
                break;
            }
            let candidate = candidate?;
            if earlier.contains(&candidate.mother.mother_id) {
                continue;
            }
            if self.matches(&candidate, requester, rules, filters, needle.as_deref())? {
                rows.push(self.row(candidate, requester)?);
            }
        }

        tracing::debug!(
            requester = %requester,
            page,
            skipped = earlier.len(),
            returned = rows.len(),
            "Collection page selected"
        );
        Ok(rows)
    }

    fn candidates(&self) -> Result<impl Iterator<Item = Result<Candidate>> + '_> {
        let ids = self.storage.mothers_newest_first()?;
        Ok(ids.map(move |id| {
            let mother_id = id?;
            let mother = self.storage.get_mother(mother_id)?.ok_or_else(|| {
                Error::IntegrityViolation(format!("index points at missing mother {}", mother_id))
            })?;
            let frags = self.storage.frags_for_mother(mother_id)?;
            Ok(Candidate { mother, frags })
        }))
    }

    fn matches(
        &self,
        candidate: &Candidate,
        requester: UserId,
        rules: &[Rule],
        filters: &CollectionFilters,
        needle: Option<&str>,
    ) -> Result<bool> {
        let mother = &candidate.mother;
        let owns_root = candidate.root()?.owner_id == requester;

        let visible = owns_root || (mother.rule != Rule::Private && rules.contains(&mother.rule));
        if !visible {
            return Ok(false);
        }
        if let Some(item_type) = filters.item_type {
            if mother.item_type != item_type {
                return Ok(false);
            }
        }
        if let Some(owner_id) = filters.owner_id {
            if !candidate.frags.iter().any(|f| f.alive && f.owner_id == owner_id) {
                return Ok(false);
            }
        }
        if let Some(needle) = needle {
            if !mother.name.to_lowercase().contains(needle) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn row(&self, candidate: Candidate, requester: UserId) -> Result<CollectionRow> {
        let root = candidate.root()?.clone();
        let live_children: Vec<&Frag> = candidate
            .frags
            .iter()
            .filter(|f| f.alive && !f.is_root())
            .collect();
        let fans = self.storage.fans_for_mother(candidate.mother.mother_id)?;
        let owner = resolve_or_placeholder(self.identity.as_ref(), root.owner_id);

        Ok(CollectionRow {
            root_frag_id: root.frag_id,
            root_owner_id: root.owner_id,
            root_owner_name: owner.display_name,
            owns_root: root.owner_id == requester,
            frags_available: live_children.iter().map(|f| u64::from(f.frags_available)).sum(),
            owns_live_child: live_children.iter().any(|f| f.owner_id == requester),
            live_child_count: live_children.len(),
            fan_count: fans.len(),
            is_fan: fans.iter().any(|f| f.user_id == requester),
            mother: candidate.mother,
        })
    }
}
