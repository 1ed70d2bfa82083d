//! File-backed identity provider.
//!
//! `directory.toml` is maintained outside Keyward (user and group
//! administration is someone else's job). It lists every user with the
//! SHA-256 of their access token:
//!
//! ```toml
//! groups = ["ops", "finance"]
//!
//! [[user]]
//! name = "alice"
//! token_sha256 = "<base64 sha256 of the token>"
//! groups = ["ops"]
//! superuser = false
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::{GroupId, Identity, IdentityProvider, UserId};
use crate::errors::{KeywardError, Result};

/// One user entry as stored in `directory.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub name: String,

    /// Base64 SHA-256 of the user's access token.
    pub token_sha256: String,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub superuser: bool,

    /// Deactivated users keep their history but can no longer act.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl DirectoryUser {
    /// Build an entry from a plaintext token (hashed immediately).
    pub fn new(name: impl Into<String>, token: &str) -> Self {
        Self {
            name: name.into(),
            token_sha256: hash_token(token),
            groups: Vec::new(),
            superuser: false,
            active: true,
        }
    }

    pub fn in_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn superuser(mut self) -> Self {
        self.superuser = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    fn to_identity(&self) -> Identity {
        Identity {
            id: UserId::new(self.name.clone()),
            groups: self.groups.iter().cloned().map(GroupId).collect(),
            is_superuser: self.superuser,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    groups: Vec<String>,

    #[serde(default, rename = "user")]
    users: Vec<DirectoryUser>,
}

/// Hash a token the way `directory.toml` stores it.
pub fn hash_token(token: &str) -> String {
    BASE64.encode(Sha256::digest(token.as_bytes()))
}

/// A fresh random access token (32 bytes, URL-safe base64).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// In-memory user/group directory.
#[derive(Debug, Default, Clone)]
pub struct Directory {
    users: BTreeMap<UserId, DirectoryUser>,
    groups: BTreeSet<GroupId>,
}

impl Directory {
    /// File name looked up inside the data directory.
    pub const FILE_NAME: &'static str = "directory.toml";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: DirectoryUser) -> Self {
        self.insert(user);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(GroupId::new(group));
        self
    }

    fn insert(&mut self, user: DirectoryUser) {
        for group in &user.groups {
            self.groups.insert(GroupId::new(group.clone()));
        }
        self.users.insert(UserId::new(user.name.clone()), user);
    }

    /// Load `directory.toml`. A missing file yields an empty directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents).map_err(|e| match e {
            KeywardError::DirectoryError(msg) => {
                KeywardError::DirectoryError(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let file: DirectoryFile =
            toml::from_str(contents).map_err(|e| KeywardError::DirectoryError(e.to_string()))?;

        let mut directory = Self::default();
        directory
            .groups
            .extend(file.groups.into_iter().map(GroupId));
        for user in file.users {
            if user.name.trim().is_empty() {
                return Err(KeywardError::DirectoryError(
                    "user entry with an empty name".into(),
                ));
            }
            if directory.users.contains_key(&UserId::new(user.name.clone())) {
                return Err(KeywardError::DirectoryError(format!(
                    "duplicate user '{}'",
                    user.name
                )));
            }
            directory.insert(user);
        }
        Ok(directory)
    }

    /// Write the directory to `path` as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = DirectoryFile {
            groups: self.groups.iter().map(|g| g.0.clone()).collect(),
            users: self.users.values().cloned().collect(),
        };
        let contents = toml::to_string_pretty(&file)
            .map_err(|e| KeywardError::DirectoryError(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn active_users(&self) -> impl Iterator<Item = &DirectoryUser> {
        self.users.values().filter(|u| u.active)
    }
}

impl IdentityProvider for Directory {
    fn resolve_user(&self, token: &str) -> Result<Identity> {
        let presented = Sha256::digest(token.as_bytes());

        // Compare against every entry so timing does not depend on
        // which user matched.
        let mut found: Option<&DirectoryUser> = None;
        for user in self.users.values() {
            let Ok(stored) = BASE64.decode(&user.token_sha256) else {
                continue;
            };
            if bool::from(stored.as_slice().ct_eq(presented.as_slice())) && found.is_none() {
                found = Some(user);
            }
        }

        match found {
            Some(user) if user.active => Ok(user.to_identity()),
            _ => Err(KeywardError::Unauthenticated),
        }
    }

    fn identity(&self, user: &UserId) -> Option<Identity> {
        self.users
            .get(user)
            .filter(|u| u.active)
            .map(DirectoryUser::to_identity)
    }

    fn group_members(&self, group: &GroupId) -> BTreeSet<UserId> {
        self.active_users()
            .filter(|u| u.groups.iter().any(|g| g == group.as_str()))
            .map(|u| UserId::new(u.name.clone()))
            .collect()
    }

    fn superusers(&self) -> BTreeSet<UserId> {
        self.active_users()
            .filter(|u| u.superuser)
            .map(|u| UserId::new(u.name.clone()))
            .collect()
    }

    fn group_exists(&self, group: &GroupId) -> bool {
        self.groups.contains(group)
    }
}
