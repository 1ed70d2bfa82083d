//! The on-disk vault: ties the file format, the master key and the
//! in-memory `SecretRegistry` together.
//!
//! ```text
//! passphrase + salt --Argon2id--> master key --HKDF--> data key (revision cipher)
//!                                            \--HKDF--> HMAC key (file integrity)
//! ```
//!
//! Every command loads the whole vault, works on it in memory and writes
//! it back. Two guards keep concurrent processes from losing each other's
//! changes:
//!
//! - [`VaultStore::open_exclusive`] holds an advisory lock on
//!   `<vault>.lock` until the store is dropped, so a second process waits
//!   and then sees the first one's result.
//! - Every save compares the header generation on disk with the one this
//!   store loaded and fails with `Conflict` if another writer got there
//!   first.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use fs2::FileExt;

use super::format::{self, VaultHeader, CURRENT_VERSION};
use super::registry::{Collaborators, SecretRegistry};
use crate::audit::{emit, AuditEvent, AuditSink};
use crate::crypto::{derive_master_key, generate_salt, AesGcmCipher, Argon2Params, MasterKey};
use crate::errors::{KeywardError, Result};
use crate::identity::{IdentityProvider, UserId};

/// Exclusive advisory lock on the file next to a vault, released on drop.
#[derive(Debug)]
pub struct VaultLock {
    _file: File,
}

impl VaultLock {
    /// Block until no other process holds the lock for `vault_path`.
    pub fn acquire(vault_path: &Path) -> Result<Self> {
        let path = Self::lock_path(vault_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            tracing::info!(path = %path.display(), "vault is in use, waiting for the lock");
            file.lock_exclusive()?;
        }
        tracing::debug!(path = %path.display(), "vault lock acquired");
        Ok(Self { _file: file })
    }

    pub fn lock_path(vault_path: &Path) -> PathBuf {
        let name = vault_path.file_name().unwrap_or_default().to_string_lossy();
        vault_path.with_file_name(format!("{name}.lock"))
    }
}

/// An open vault file.
pub struct VaultStore {
    path: PathBuf,
    header: VaultHeader,
    master_key: MasterKey,
    registry: SecretRegistry,
    audit: Arc<dyn AuditSink>,
    /// Generation last written or read by this store; `None` until a new
    /// vault is first saved. The mutex also serialises saves.
    generation: Mutex<Option<u64>>,
    lock: Option<VaultLock>,
}

impl VaultStore {
    /// Create a new, empty vault at `path` and write it to disk.
    pub fn create(
        path: &Path,
        passphrase: &[u8],
        params: &Argon2Params,
        directory: Arc<dyn IdentityProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        if path.exists() {
            return Err(KeywardError::VaultAlreadyExists(path.to_path_buf()));
        }

        let salt = generate_salt();
        let master_key = derive_master_key(passphrase, &salt, params)?;
        let header = VaultHeader {
            version: CURRENT_VERSION,
            salt: salt.to_vec(),
            created_at: Utc::now(),
            argon2_params: *params,
            generation: 0,
        };
        let cipher = Arc::new(AesGcmCipher::new(&master_key)?);
        let registry = SecretRegistry::new(Collaborators {
            directory,
            cipher,
            audit: audit.clone(),
        });

        let store = Self {
            path: path.to_path_buf(),
            header,
            master_key,
            registry,
            audit,
            generation: Mutex::new(None),
            lock: None,
        };
        store.save()?;
        tracing::info!(path = %path.display(), "vault created");
        Ok(store)
    }

    /// Open an existing vault without holding its lock. Saves still refuse
    /// to overwrite a newer file.
    pub fn open(
        path: &Path,
        passphrase: &[u8],
        directory: Arc<dyn IdentityProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        Self::load(path, passphrase, directory, audit, None)
    }

    /// Open an existing vault and keep it locked until the store is
    /// dropped. Waits while another process holds the lock.
    pub fn open_exclusive(
        path: &Path,
        passphrase: &[u8],
        directory: Arc<dyn IdentityProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        if !path.exists() {
            return Err(KeywardError::VaultNotFound(path.to_path_buf()));
        }
        let lock = VaultLock::acquire(path)?;
        Self::load(path, passphrase, directory, audit, Some(lock))
    }

    /// Verifies the HMAC over the raw bytes before anything in the body is
    /// trusted.
    fn load(
        path: &Path,
        passphrase: &[u8],
        directory: Arc<dyn IdentityProvider>,
        audit: Arc<dyn AuditSink>,
        lock: Option<VaultLock>,
    ) -> Result<Self> {
        let raw = format::read_vault(path)?;
        let master_key = derive_master_key(passphrase, &raw.header.salt, &raw.header.argon2_params)?;

        let hmac_key = master_key.derive_hmac_key()?;
        format::verify_hmac(&hmac_key[..], &raw.header_bytes, &raw.body_bytes, &raw.stored_hmac)
            .map_err(|e| {
                tracing::warn!(path = %path.display(), "vault HMAC check failed");
                e
            })?;

        let snapshot = raw.snapshot()?;
        let cipher = Arc::new(AesGcmCipher::new(&master_key)?);
        let registry = SecretRegistry::restore(
            snapshot,
            Collaborators {
                directory,
                cipher,
                audit: audit.clone(),
            },
        )?;
        tracing::debug!(
            path = %path.display(),
            secrets = registry.secret_count(),
            generation = raw.header.generation,
            locked = lock.is_some(),
            "vault opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            generation: Mutex::new(Some(raw.header.generation)),
            header: raw.header,
            master_key,
            registry,
            audit,
            lock,
        })
    }

    /// Write the current registry state to disk atomically.
    ///
    /// Fails with `Conflict` when another writer saved the file after this
    /// store loaded it; the file is left as that writer wrote it.
    pub fn save(&self) -> Result<()> {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _save_lock = match self.lock {
            Some(_) => None,
            None => Some(VaultLock::acquire(&self.path)?),
        };

        let on_disk = match format::read_vault(&self.path) {
            Ok(raw) => Some(raw.header.generation),
            Err(KeywardError::VaultNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if on_disk != *generation {
            tracing::warn!(
                path = %self.path.display(),
                expected = ?*generation,
                found = ?on_disk,
                "vault changed on disk since it was loaded"
            );
            return Err(match *generation {
                None => KeywardError::VaultAlreadyExists(self.path.clone()),
                Some(_) => KeywardError::Conflict(
                    "the vault was changed by someone else since it was opened; run the command again"
                        .into(),
                ),
            });
        }

        let next = (*generation).map_or(1, |g| g + 1);
        let header = VaultHeader {
            generation: next,
            ..self.header.clone()
        };
        let hmac_key = self.master_key.derive_hmac_key()?;
        format::write_vault(&self.path, &header, &self.registry.snapshot(), &hmac_key[..])?;
        *generation = Some(next);
        Ok(())
    }

    /// [`save`](Self::save), recording a warning in the audit log when the
    /// write fails. Audit events for the unsaved changes were already
    /// emitted by the registry, so the log needs to say they did not stick.
    pub fn save_as(&self, actor: &UserId) -> Result<()> {
        self.save().map_err(|e| {
            emit(
                self.audit.as_ref(),
                AuditEvent::warning(actor, format!("changes by {actor} were not saved: {e}")),
            );
            e
        })
    }

    pub fn registry(&self) -> &SecretRegistry {
        &self.registry
    }

    /// Replace the registry's search cap (from settings).
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.registry = self.registry.with_search_limit(limit);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The header as it was when the vault was created or opened.
    pub fn header(&self) -> &VaultHeader {
        &self.header
    }

    /// Generation of the file as last written or read by this store.
    pub fn generation(&self) -> Option<u64> {
        *self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.header.created_at
    }
}
