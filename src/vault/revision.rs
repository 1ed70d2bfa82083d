//! Append-only, encrypted revision log.
//!
//! Each value a secret ever held is one [`Revision`]. Revisions are never
//! updated or removed; only their `accessed_by` set grows. The store does
//! not authorize anything itself: callers check the policy first and hand
//! in the secret they have locked.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::format::{base64_decode, base64_encode};
use super::secret::{Secret, SecretId, SecretPayload};
use crate::audit::{emit, AuditEvent, AuditSink};
use crate::crypto::Cipher;
use crate::errors::{KeywardError, Result};
use crate::identity::UserId;

/// Identifier of a revision: its 1-based position in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(pub u64);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One immutable, encrypted snapshot of a secret's value.
pub struct Revision {
    id: RevisionId,
    secret: SecretId,
    ciphertext: Vec<u8>,
    length: usize,
    created: DateTime<Utc>,
    set_by: UserId,
    accessed_by: Mutex<BTreeSet<UserId>>,
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("id", &self.id)
            .field("secret", &self.secret)
            .field("length", &self.length)
            .field("set_by", &self.set_by)
            .finish_non_exhaustive()
    }
}

impl Revision {
    fn accessed_by(&self) -> BTreeSet<UserId> {
        self.accessed_by
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add `reader`; returns `false` if they had already read this value.
    fn record_access(&self, reader: &UserId) -> bool {
        self.accessed_by
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reader.clone())
    }

    fn info(&self, current: Option<RevisionId>) -> RevisionInfo {
        RevisionInfo {
            id: self.id,
            secret: self.secret,
            length: self.length,
            created: self.created,
            set_by: self.set_by.clone(),
            accessed_by: self.accessed_by(),
            is_current: current == Some(self.id),
        }
    }
}

/// Revision metadata, safe to hand to any caller allowed to see history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub id: RevisionId,
    pub secret: SecretId,
    pub length: usize,
    pub created: DateTime<Utc>,
    pub set_by: UserId,
    pub accessed_by: BTreeSet<UserId>,
    pub is_current: bool,
}

/// A decrypted value together with where it came from.
#[derive(Debug, Clone)]
pub struct RevealedValue {
    pub revision: RevisionId,
    pub payload: SecretPayload,
    pub length: usize,
}

/// Serialized form of a revision inside the vault file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub id: RevisionId,
    pub secret: SecretId,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,
    pub length: usize,
    pub created: DateTime<Utc>,
    pub set_by: UserId,
    pub accessed_by: BTreeSet<UserId>,
}

/// The append-only revision log.
pub struct RevisionStore {
    log: RwLock<Vec<Arc<Revision>>>,
    cipher: Arc<dyn Cipher>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for RevisionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionStore")
            .field("revisions", &self.len())
            .finish_non_exhaustive()
    }
}

impl RevisionStore {
    pub fn new(cipher: Arc<dyn Cipher>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            cipher,
            audit,
        }
    }

    /// Rebuild a store from persisted records. Ids must be exactly
    /// 1, 2, 3, ... in order.
    pub fn from_records(
        records: Vec<RevisionRecord>,
        cipher: Arc<dyn Cipher>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let mut log = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            if record.id.0 != index as u64 + 1 {
                return Err(KeywardError::InvalidVaultFormat(format!(
                    "revision {} stored at position {}",
                    record.id,
                    index + 1
                )));
            }
            log.push(Arc::new(Revision {
                id: record.id,
                secret: record.secret,
                ciphertext: record.ciphertext,
                length: record.length,
                created: record.created,
                set_by: record.set_by,
                accessed_by: Mutex::new(record.accessed_by),
            }));
        }
        Ok(Self {
            log: RwLock::new(log),
            cipher,
            audit,
        })
    }

    pub fn records(&self) -> Vec<RevisionRecord> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|rev| RevisionRecord {
                id: rev.id,
                secret: rev.secret,
                ciphertext: rev.ciphertext.clone(),
                length: rev.length,
                created: rev.created,
                set_by: rev.set_by.clone(),
                accessed_by: rev.accessed_by(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, id: RevisionId) -> Option<Arc<Revision>> {
        let index = usize::try_from(id.0.checked_sub(1)?).ok()?;
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Encrypt `payload` and append it as the secret's new current value.
    ///
    /// Taking `&mut Secret` means the caller holds the secret exclusively,
    /// so concurrent writers on one secret are serialized and readers never
    /// see `current_revision` pointing at a revision still being written.
    pub fn create_revision(
        &self,
        secret: &mut Secret,
        author: &UserId,
        payload: &SecretPayload,
    ) -> Result<RevisionId> {
        if payload.content_type() != secret.content_type {
            return Err(KeywardError::InvalidInput(format!(
                "'{}' stores a {}, not a {}",
                secret.name,
                secret.content_type,
                payload.content_type()
            )));
        }
        payload.validate()?;

        let plaintext = payload.to_plaintext()?;
        let length = payload.display_length()?;
        let ciphertext = self.cipher.encrypt(&plaintext)?;
        let created = Utc::now();

        let id = {
            let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
            let id = RevisionId(log.len() as u64 + 1);
            log.push(Arc::new(Revision {
                id,
                secret: secret.id,
                ciphertext,
                length,
                created,
                set_by: author.clone(),
                accessed_by: Mutex::new(BTreeSet::new()),
            }));
            id
        };

        secret.current_revision = Some(id);
        secret.last_changed = Some(created);

        tracing::info!(secret = %secret.id, revision = %id, "stored new revision");
        emit(
            self.audit.as_ref(),
            AuditEvent::info(
                author,
                format!(
                    "{author} set a new value for '{}' ({}:{id})",
                    secret.name, secret.id
                ),
            )
            .secret(secret.id)
            .revision(id),
        );
        Ok(id)
    }

    /// Decrypt the secret's current value and record `reader` as having
    /// seen it.
    pub fn read_current_value(&self, secret: &Secret, reader: &UserId) -> Result<RevealedValue> {
        let current = secret
            .current_revision
            .ok_or_else(|| KeywardError::NotFound(format!("value of '{}'", secret.name)))?;
        self.read_revision_value(secret, current, reader)
    }

    /// Decrypt a specific revision of `secret`.
    pub fn read_revision_value(
        &self,
        secret: &Secret,
        id: RevisionId,
        reader: &UserId,
    ) -> Result<RevealedValue> {
        let revision = self
            .get(id)
            .filter(|rev| rev.secret == secret.id)
            .ok_or_else(|| KeywardError::NotFound(format!("revision {id}")))?;

        let plaintext = self.cipher.decrypt(&revision.ciphertext).map_err(|e| {
            tracing::error!(secret = %secret.id, revision = %id, error = %e, "revision failed to decrypt");
            KeywardError::DataIntegrity(id.0)
        })?;
        let payload =
            SecretPayload::from_plaintext(secret.content_type, &plaintext).map_err(|_| {
                tracing::error!(secret = %secret.id, revision = %id, "revision payload is malformed");
                KeywardError::DataIntegrity(id.0)
            })?;

        if revision.record_access(reader) {
            tracing::debug!(revision = %id, reader = %reader, "first read of revision by user");
        }
        emit(
            self.audit.as_ref(),
            AuditEvent::info(
                reader,
                format!("{reader} read '{}' ({}:{id})", secret.name, secret.id),
            )
            .secret(secret.id)
            .revision(id),
        );

        Ok(RevealedValue {
            revision: id,
            payload,
            length: revision.length,
        })
    }

    /// Stored cleartext length of the current value. Never decrypts.
    pub fn placeholder_length(&self, secret: &Secret) -> Option<usize> {
        secret
            .current_revision
            .and_then(|id| self.get(id))
            .map(|rev| rev.length)
    }

    /// Metadata of one revision by direct reference.
    pub fn info(&self, id: RevisionId, current: Option<RevisionId>) -> Option<RevisionInfo> {
        self.get(id).map(|rev| rev.info(current))
    }

    /// Every revision of `secret`, oldest first.
    pub fn history(&self, secret: &Secret) -> Vec<RevisionInfo> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|rev| rev.secret == secret.id)
            .map(|rev| rev.info(secret.current_revision))
            .collect()
    }

    /// The secret a revision belongs to.
    pub fn owner_of(&self, id: RevisionId) -> Option<SecretId> {
        self.get(id).map(|rev| rev.secret)
    }

    /// `true` if `user` has read the value `revision` holds.
    pub fn was_read_by(&self, id: RevisionId, user: &UserId) -> bool {
        self.get(id).is_some_and(|rev| {
            rev.accessed_by
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(user)
        })
    }
}
