//! The encryption collaborator handed to the revision store.
//!
//! The revision store only ever sees the [`Cipher`] trait. The default
//! implementation seals with AES-256-GCM under a data key derived from the
//! vault master key; the key can be dropped at runtime with
//! [`AesGcmCipher::lock`], after which every call fails with
//! `KeyUnavailable`.

use std::sync::{PoisonError, RwLock};

use zeroize::Zeroizing;

use super::encryption::{open, seal};
use super::keys::{MasterKey, KEY_LEN};
use crate::errors::{KeywardError, Result};

/// Symmetric encryption of revision payloads.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Returns the cleartext in a buffer that is wiped on drop.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// AES-256-GCM cipher keyed from the vault master key.
pub struct AesGcmCipher {
    data_key: RwLock<Option<Zeroizing<[u8; KEY_LEN]>>>,
}

impl AesGcmCipher {
    pub fn new(master_key: &MasterKey) -> Result<Self> {
        Ok(Self {
            data_key: RwLock::new(Some(master_key.derive_data_key()?)),
        })
    }

    /// A cipher with no key loaded.
    pub fn locked() -> Self {
        Self {
            data_key: RwLock::new(None),
        }
    }

    /// Drop the data key from memory.
    pub fn lock(&self) {
        *self.data_key.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Load the data key derived from `master_key`.
    pub fn unlock(&self, master_key: &MasterKey) -> Result<()> {
        let key = master_key.derive_data_key()?;
        *self.data_key.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.data_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn with_key<T>(&self, f: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        let guard = self.data_key.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(key) => f(&key[..]),
            None => Err(KeywardError::KeyUnavailable),
        }
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.with_key(|key| seal(key, plaintext))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.with_key(|key| open(key, ciphertext))
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
