//! Caller identities and the identity provider boundary.
//!
//! The core never authenticates anyone itself: a presentation layer hands
//! in a token, an [`IdentityProvider`] resolves it into an [`Identity`],
//! and every vault operation takes that resolved identity.

pub mod directory;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use directory::{generate_token, hash_token, Directory, DirectoryUser};

/// A user, identified by username.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// A group, identified by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl UserId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl GroupId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved caller: who they are, which groups they belong to, and
/// whether they carry the superuser override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub groups: BTreeSet<GroupId>,
    pub is_superuser: bool,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            groups: BTreeSet::new(),
            is_superuser: false,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(|g| GroupId::new(g)));
        self
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn in_any_group(&self, groups: &BTreeSet<GroupId>) -> bool {
        !self.groups.is_disjoint(groups)
    }
}

/// Resolves callers and answers the directory questions the policy
/// engine needs (group membership, the superuser roster).
pub trait IdentityProvider: Send + Sync {
    /// Resolve an opaque caller token. Unknown or inactive users fail
    /// with `Unauthenticated`.
    fn resolve_user(&self, token: &str) -> Result<Identity>;

    /// Look up a user by id, if they exist and are active.
    fn identity(&self, user: &UserId) -> Option<Identity>;

    /// Active members of `group`.
    fn group_members(&self, group: &GroupId) -> BTreeSet<UserId>;

    /// All active superusers.
    fn superusers(&self) -> BTreeSet<UserId>;

    fn group_exists(&self, group: &GroupId) -> bool;
}
