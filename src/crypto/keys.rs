//! Key derivation helpers using HKDF-SHA256.
//!
//! A single master key (from Argon2id) yields two independent sub-keys:
//! - the **data key** that seals revision payloads
//! - the **HMAC key** that authenticates the vault file

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::errors::{KeywardError, Result};

/// Length of the master key and all derived sub-keys (256 bits).
pub const KEY_LEN: usize = 32;

const DATA_KEY_INFO: &[u8] = b"keyward-revision-data";
const HMAC_KEY_INFO: &[u8] = b"keyward-vault-hmac";

fn hkdf_expand(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| KeywardError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// A 32-byte master key whose memory is wiped on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Key used by [`crate::crypto::AesGcmCipher`] for revision payloads.
    pub fn derive_data_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        hkdf_expand(&self.bytes, DATA_KEY_INFO)
    }

    /// Key used to authenticate the on-disk vault file.
    pub fn derive_hmac_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        hkdf_expand(&self.bytes, HMAC_KEY_INFO)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
