//! Identity directory seam
//!
//! User records live outside the ledger. The ledger only needs a display
//! name, a visibility flag and whether the user may receive frags. Lookups
//! that fail degrade to a placeholder instead of blocking the mutation.

use crate::{types::UserId, Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the ledger knows about a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID
    pub user_id: UserId,
    /// Display name
    pub display_name: String,
    /// Profile is publicly visible
    pub visible: bool,
    /// User may receive frags
    pub allowed: bool,
}

impl UserProfile {
    /// Stand-in used when the directory cannot answer
    pub fn placeholder(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: format!("user-{}", user_id),
            visible: false,
            allowed: true,
        }
    }
}

/// User lookup
pub trait IdentityDirectory: Send + Sync {
    /// Resolve a user ID
    fn lookup(&self, user_id: UserId) -> Result<UserProfile>;
}

/// Resolve a user, falling back to [`UserProfile::placeholder`]
pub fn resolve_or_placeholder(directory: &dyn IdentityDirectory, user_id: UserId) -> UserProfile {
    match directory.lookup(user_id) {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Identity lookup failed, using placeholder");
            UserProfile::placeholder(user_id)
        }
    }
}

/// In-memory directory
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl StaticDirectory {
    /// Create empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user
    pub fn insert(&self, profile: UserProfile) {
        self.users.write().insert(profile.user_id, profile);
    }

    /// Add a visible, allowed user
    pub fn with_user(self, user_id: UserId, display_name: impl Into<String>) -> Self {
        self.insert(UserProfile {
            user_id,
            display_name: display_name.into(),
            visible: true,
            allowed: true,
        });
        self
    }
}

impl IdentityDirectory for StaticDirectory {
    fn lookup(&self, user_id: UserId) -> Result<UserProfile> {
        self.users
            .read()
            .get(&user_id)
            .cloned()
            .ok_or(Error::NotFoundOrForbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_user_resolves() {
        let directory = StaticDirectory::new().with_user(UserId::new(1), "reefer");
        let profile = resolve_or_placeholder(&directory, UserId::new(1));
        assert_eq!(profile.display_name, "reefer");
        assert!(profile.allowed);
    }

    #[test]
    fn test_unknown_user_degrades_to_placeholder() {
        let directory = StaticDirectory::new();
        let profile = resolve_or_placeholder(&directory, UserId::new(9));
        assert_eq!(profile, UserProfile::placeholder(UserId::new(9)));
        assert_eq!(profile.display_name, "user-9");
    }

    #[test]
    fn test_insert_replaces_profile() {
        let directory = StaticDirectory::new().with_user(UserId::new(3), "banned soon");
        directory.insert(UserProfile {
            user_id: UserId::new(3),
            display_name: "banned".into(),
            visible: false,
            allowed: false,
        });
        assert!(!directory.lookup(UserId::new(3)).unwrap().allowed);
    }
}
