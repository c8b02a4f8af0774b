//! Lineage reconstruction
//!
//! A mother's frags are stored as flat rows linked by `frag_of`. The tree is
//! rebuilt into an arena: nodes live in one `Vec`, parent and child links are
//! indices into it. Anything other than a single root with every node
//! reachable from it is an integrity violation, not a recoverable error.

use crate::{
    storage::Storage,
    types::{Frag, Mother, Rule, UserId},
    Error, Result,
};
use std::collections::HashMap;
use uuid::Uuid;

/// One frag in the arena
#[derive(Debug, Clone)]
pub struct LineageNode {
    /// The frag row
    pub frag: Frag,
    /// Arena index of the parent
    pub parent: Option<usize>,
    /// Arena indices of the children, in input order
    pub children: Vec<usize>,
    /// Distance from the root
    pub depth: usize,
}

/// Ownership tree of one mother
#[derive(Debug, Clone)]
pub struct LineageTree {
    nodes: Vec<LineageNode>,
    index: HashMap<Uuid, usize>,
    root: usize,
}

impl LineageTree {
    /// Build the tree from flat rows
    pub fn build(frags: Vec<Frag>) -> Result<Self> {
        let mut index = HashMap::with_capacity(frags.len());
        for (i, frag) in frags.iter().enumerate() {
            if index.insert(frag.frag_id, i).is_some() {
                return Err(Error::IntegrityViolation(format!(
                    "frag {} appears twice",
                    frag.frag_id
                )));
            }
        }

        let mut nodes: Vec<LineageNode> = frags
            .into_iter()
            .map(|frag| LineageNode {
                frag,
                parent: None,
                children: Vec::new(),
                depth: 0,
            })
            .collect();

        let mut root: Option<usize> = None;
        for i in 0..nodes.len() {
            match nodes[i].frag.frag_of {
                None => {
                    if let Some(existing) = root {
                        return Err(Error::IntegrityViolation(format!(
                            "two roots: {} and {}",
                            nodes[existing].frag.frag_id, nodes[i].frag.frag_id
                        )));
                    }
                    root = Some(i);
                }
                Some(parent_id) => {
                    let parent = *index.get(&parent_id).ok_or_else(|| {
                        Error::IntegrityViolation(format!(
                            "frag {} points at missing parent {}",
                            nodes[i].frag.frag_id, parent_id
                        ))
                    })?;
                    nodes[i].parent = Some(parent);
                    nodes[parent].children.push(i);
                }
            }
        }

        let root = root.ok_or_else(|| Error::IntegrityViolation("lineage has no root".into()))?;

        // Assign depths from the root; anything left unvisited sits on a cycle.
        let mut visited = 0;
        let mut stack = vec![(root, 0)];
        while let Some((i, depth)) = stack.pop() {
            nodes[i].depth = depth;
            visited += 1;
            stack.extend(nodes[i].children.iter().map(|&c| (c, depth + 1)));
        }
        if visited != nodes.len() {
            return Err(Error::IntegrityViolation(format!(
                "{} frags unreachable from the root",
                nodes.len() - visited
            )));
        }

        Ok(Self { nodes, index, root })
    }

    /// Root node
    pub fn root(&self) -> &LineageNode {
        &self.nodes[self.root]
    }

    /// Number of frags
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a valid tree has a root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by frag ID
    pub fn get(&self, frag_id: Uuid) -> Option<&LineageNode> {
        self.index.get(&frag_id).map(|&i| &self.nodes[i])
    }

    /// Children of a node
    pub fn children<'a>(&'a self, node: &'a LineageNode) -> impl Iterator<Item = &'a LineageNode> + 'a {
        node.children.iter().map(move |&i| &self.nodes[i])
    }

    /// Parent of a node
    pub fn parent(&self, node: &LineageNode) -> Option<&LineageNode> {
        node.parent.map(|i| &self.nodes[i])
    }

    /// Pre-order walk from the root
    pub fn walk(&self) -> Vec<&LineageNode> {
        self.walk_from(self.root)
    }

    /// Frags of the subtree rooted at `frag_id`, pre-order
    pub fn subtree(&self, frag_id: Uuid) -> Option<Vec<&Frag>> {
        let start = *self.index.get(&frag_id)?;
        Some(self.walk_from(start).into_iter().map(|n| &n.frag).collect())
    }

    /// Ancestors of `frag_id`, nearest first
    pub fn ancestors(&self, frag_id: Uuid) -> Vec<&Frag> {
        let mut out = Vec::new();
        let mut current = self.index.get(&frag_id).and_then(|&i| self.nodes[i].parent);
        while let Some(i) = current {
            out.push(&self.nodes[i].frag);
            current = self.nodes[i].parent;
        }
        out
    }

    /// Number of live frags
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.frag.alive).count()
    }

    fn walk_from(&self, start: usize) -> Vec<&LineageNode> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            out.push(&self.nodes[i]);
            stack.extend(self.nodes[i].children.iter().rev());
        }
        out
    }
}

/// A private lineage is only visible to the owner of its root frag
pub(crate) fn ensure_visible(mother: &Mother, frags: &[Frag], viewer: UserId) -> Result<()> {
    if mother.rule != Rule::Private {
        return Ok(());
    }
    let root = frags.iter().find(|f| f.is_root()).ok_or_else(|| {
        Error::IntegrityViolation(format!("mother {} has no root frag", mother.mother_id))
    })?;
    if root.owner_id != viewer {
        return Err(Error::NotFoundOrForbidden);
    }
    Ok(())
}

/// A frag of a private lineage, and its journal, are only visible to its owner
pub(crate) fn ensure_frag_visible(mother: &Mother, frag: &Frag, viewer: UserId) -> Result<()> {
    if mother.rule == Rule::Private && frag.owner_id != viewer {
        return Err(Error::NotFoundOrForbidden);
    }
    Ok(())
}

/// Flat frag rows of a mother, ordered by (`frag_of`, `date_acquired`), root first
pub fn select_frags_for_mother(storage: &Storage, viewer: UserId, mother_id: Uuid) -> Result<Vec<Frag>> {
    let mother = storage.get_mother(mother_id)?.ok_or(Error::NotFoundOrForbidden)?;
    let mut frags = storage.frags_for_mother(mother_id)?;
    ensure_visible(&mother, &frags, viewer)?;

    frags.sort_by(|a, b| {
        a.frag_of
            .cmp(&b.frag_of)
            .then_with(|| a.date_acquired.cmp(&b.date_acquired))
            .then_with(|| a.frag_id.cmp(&b.frag_id))
    });
    Ok(frags)
}

/// Lineage tree of a mother, built from [`select_frags_for_mother`]
pub fn lineage_for_mother(storage: &Storage, viewer: UserId, mother_id: Uuid) -> Result<LineageTree> {
    let frags = select_frags_for_mother(storage, viewer, mother_id)?;
    let tree = LineageTree::build(frags).map_err(|e| {
        tracing::error!(mother_id = %mother_id, error = %e, "Lineage is corrupt");
        e
    })?;
    tracing::debug!(mother_id = %mother_id, frags = tree.len(), "Lineage rebuilt");
    Ok(tree)
}
