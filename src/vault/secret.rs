//! Secret metadata and the value payloads a secret can hold.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::revision::RevisionId;
use crate::errors::{KeywardError, Result};
use crate::identity::{GroupId, UserId};

/// Longest allowed secret name, in characters.
pub const MAX_NAME_LEN: usize = 92;

/// Stable identifier of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(pub u64);

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of value a secret stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Password,
    CreditCard,
    File,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Password => "password",
            Self::CreditCard => "credit card",
            Self::File => "file",
        })
    }
}

/// Who may see and read a secret without being on its ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Visible and readable by every authenticated user.
    Any,
    /// Visible to everyone, readable only by ACL members (others may request access).
    Request,
    /// Invisible to everyone except ACL members, the creator and superusers.
    Hidden,
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::Request => "request",
            Self::Hidden => "hidden",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretStatus {
    Active,
    /// Soft-deleted: gone from listings and lookups, revisions kept.
    Deleted,
}

/// A named vault entry. The value itself lives in the revision store;
/// `current_revision` only points into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub id: SecretId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content_type: ContentType,
    pub access_policy: AccessPolicy,
    pub status: SecretStatus,
    /// Rotate this value when someone who has read it leaves.
    pub needs_changing_on_leave: bool,
    pub created_by: UserId,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_read: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    pub allowed_groups: BTreeSet<GroupId>,
    pub allowed_users: BTreeSet<UserId>,
    #[serde(default)]
    pub current_revision: Option<RevisionId>,
}

impl Secret {
    pub fn is_active(&self) -> bool {
        self.status == SecretStatus::Active
    }

    /// Case-insensitive match against the searchable text fields.
    pub fn matches(&self, needle_lower: &str) -> bool {
        let hit = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(needle_lower))
        };
        self.name.to_lowercase().contains(needle_lower)
            || hit(&self.description)
            || hit(&self.url)
            || hit(&self.username)
    }
}

/// Validate a secret name: non-empty after trimming, at most
/// [`MAX_NAME_LEN`] characters.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(KeywardError::InvalidInput(
            "secret name cannot be empty".into(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(KeywardError::InvalidInput(format!(
            "secret name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Credit card fields, stored together as one JSON value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CardData {
    pub number: String,
    pub holder: String,
    pub expiration_month: u8,
    pub expiration_year: u16,
    pub security_code: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardData").finish_non_exhaustive()
    }
}

impl CardData {
    fn validate(&self) -> Result<()> {
        let mut digits = self.number.chars().filter(|c| !c.is_whitespace());
        if self.number.trim().is_empty() || !digits.all(|c| c.is_ascii_digit()) {
            return Err(KeywardError::InvalidInput(
                "card number must contain only digits".into(),
            ));
        }
        if !(1..=12).contains(&self.expiration_month) {
            return Err(KeywardError::InvalidInput(format!(
                "expiration month {} is not between 1 and 12",
                self.expiration_month
            )));
        }
        Ok(())
    }
}

/// A decrypted secret value.
#[derive(Clone, PartialEq, Eq)]
pub enum SecretPayload {
    Password(Zeroizing<String>),
    CreditCard(CardData),
    File(Zeroizing<Vec<u8>>),
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretPayload::{}(..)", self.content_type())
    }
}

impl SecretPayload {
    pub fn password(value: impl Into<String>) -> Self {
        Self::Password(Zeroizing::new(value.into()))
    }

    pub fn file(bytes: impl Into<Vec<u8>>) -> Self {
        Self::File(Zeroizing::new(bytes.into()))
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Password(_) => ContentType::Password,
            Self::CreditCard(_) => ContentType::CreditCard,
            Self::File(_) => ContentType::File,
        }
    }

    /// Length used to render a same-length mask: characters for
    /// passwords, bytes of the stored encoding otherwise.
    pub fn display_length(&self) -> Result<usize> {
        match self {
            Self::Password(pw) => Ok(pw.chars().count()),
            _ => Ok(self.to_plaintext()?.len()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::CreditCard(card) => card.validate(),
            Self::Password(_) | Self::File(_) => Ok(()),
        }
    }

    /// Encode for encryption.
    pub fn to_plaintext(&self) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            Self::Password(pw) => Ok(Zeroizing::new(pw.as_bytes().to_vec())),
            Self::CreditCard(card) => serde_json::to_vec(card)
                .map(Zeroizing::new)
                .map_err(|e| KeywardError::SerializationError(format!("card data: {e}"))),
            Self::File(bytes) => Ok(Zeroizing::new(bytes.to_vec())),
        }
    }

    /// Decode a decrypted buffer for a secret of `content_type`.
    pub fn from_plaintext(content_type: ContentType, plaintext: &[u8]) -> Result<Self> {
        match content_type {
            ContentType::Password => std::str::from_utf8(plaintext)
                .map(Self::password)
                .map_err(|_| {
                    KeywardError::SerializationError("password is not valid UTF-8".into())
                }),
            ContentType::CreditCard => serde_json::from_slice(plaintext)
                .map(Self::CreditCard)
                .map_err(|e| KeywardError::SerializationError(format!("card data: {e}"))),
            ContentType::File => Ok(Self::file(plaintext)),
        }
    }
}

/// Input for creating a secret.
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub name: String,
    pub description: Option<String>,
    pub access_policy: AccessPolicy,
    pub needs_changing_on_leave: bool,
    pub url: Option<String>,
    pub username: Option<String>,
    pub filename: Option<String>,
    pub allowed_groups: BTreeSet<GroupId>,
    pub allowed_users: BTreeSet<UserId>,
    pub payload: SecretPayload,
}

impl NewSecret {
    /// A secret with no extra metadata and an empty ACL.
    pub fn new(name: impl Into<String>, access_policy: AccessPolicy, payload: SecretPayload) -> Self {
        Self {
            name: name.into(),
            description: None,
            access_policy,
            needs_changing_on_leave: true,
            url: None,
            username: None,
            filename: None,
            allowed_groups: BTreeSet::new(),
            allowed_users: BTreeSet::new(),
            payload,
        }
    }

    pub fn allow_group(mut self, group: impl Into<String>) -> Self {
        self.allowed_groups.insert(GroupId::new(group));
        self
    }

    pub fn allow_user(mut self, user: impl Into<String>) -> Self {
        self.allowed_users.insert(UserId::new(user));
        self
    }
}

/// Partial update for an existing secret. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SecretUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub access_policy: Option<AccessPolicy>,
    pub needs_changing_on_leave: Option<bool>,
    pub url: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub filename: Option<Option<String>>,
    pub allowed_groups: Option<BTreeSet<GroupId>>,
    pub allowed_users: Option<BTreeSet<UserId>>,
    /// A new value; creates a revision.
    pub payload: Option<SecretPayload>,
}

impl SecretUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.access_policy.is_none()
            && self.needs_changing_on_leave.is_none()
            && self.url.is_none()
            && self.username.is_none()
            && self.filename.is_none()
            && self.allowed_groups.is_none()
            && self.allowed_users.is_none()
            && self.payload.is_none()
    }
}
