//! Binary vault file format and HMAC integrity verification.
//!
//! A `.kwv` file has this layout:
//!
//! ```text
//! [KWV1: 4 bytes][version: 1 byte][header_len: 4 bytes LE][header JSON][body JSON][HMAC-SHA256: 32 bytes]
//! ```
//!
//! - **Header JSON**: serialized `VaultHeader` (salt and KDF cost).
//! - **Body JSON**: serialized `VaultSnapshot` (secrets, revision log,
//!   access requests). Secret values only appear as ciphertext.
//! - **HMAC-SHA256**: tag over header + body bytes, keyed from the master key.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::access_request::AccessRequest;
use super::revision::RevisionRecord;
use super::secret::Secret;
use crate::crypto::Argon2Params;
use crate::errors::{KeywardError, Result};

/// Magic bytes at the start of every vault file.
const MAGIC: &[u8; 4] = b"KWV1";

/// Current binary format version.
pub const CURRENT_VERSION: u8 = 1;

const HMAC_LEN: usize = 32;

/// 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

/// Metadata stored at the beginning of a vault file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultHeader {
    pub version: u8,

    /// Argon2id salt (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    pub created_at: DateTime<Utc>,

    /// KDF cost used at creation; reopening must use the same.
    pub argon2_params: Argon2Params,

    /// Bumped on every save. A writer whose copy is older than the file
    /// has lost a race and must not overwrite it.
    #[serde(default)]
    pub generation: u64,
}

/// Everything the registry persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultSnapshot {
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub revisions: Vec<RevisionRecord>,
    #[serde(default)]
    pub requests: Vec<AccessRequest>,
}

/// Write a vault file to disk atomically (temp file + rename).
pub fn write_vault(
    path: &Path,
    header: &VaultHeader,
    snapshot: &VaultSnapshot,
    hmac_key: &[u8],
) -> Result<()> {
    let header_bytes = serde_json::to_vec(header)
        .map_err(|e| KeywardError::SerializationError(format!("header: {e}")))?;
    let body_bytes = serde_json::to_vec(snapshot)
        .map_err(|e| KeywardError::SerializationError(format!("body: {e}")))?;

    let hmac_tag = compute_hmac(hmac_key, &header_bytes, &body_bytes)?;

    let header_len = u32::try_from(header_bytes.len()).map_err(|_| {
        KeywardError::SerializationError(format!(
            "header length {} exceeds u32::MAX",
            header_bytes.len()
        ))
    })?;
    let mut buf =
        Vec::with_capacity(PREFIX_LEN + header_bytes.len() + body_bytes.len() + HMAC_LEN);
    buf.extend_from_slice(MAGIC);
    buf.push(CURRENT_VERSION);
    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(&body_bytes);
    buf.extend_from_slice(&hmac_tag);

    // Same directory, so the rename stays on one filesystem.
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    fs::write(&tmp_path, &buf)?;
    restrict_permissions(&tmp_path)?;
    fs::rename(&tmp_path, path)?;

    tracing::debug!(path = %path.display(), bytes = buf.len(), "vault written");
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// A vault file split into its parts, keeping the raw bytes so the HMAC is
/// checked over exactly what was written.
pub struct RawVault {
    pub header: VaultHeader,
    pub header_bytes: Vec<u8>,
    pub body_bytes: Vec<u8>,
    pub stored_hmac: Vec<u8>,
}

impl RawVault {
    /// Parse the body. Only call after the HMAC has been verified.
    pub fn snapshot(&self) -> Result<VaultSnapshot> {
        serde_json::from_slice(&self.body_bytes)
            .map_err(|e| KeywardError::InvalidVaultFormat(format!("body JSON: {e}")))
    }
}

/// Read a vault file and split it. The body is not parsed yet.
pub fn read_vault(path: &Path) -> Result<RawVault> {
    if !path.exists() {
        return Err(KeywardError::VaultNotFound(path.to_path_buf()));
    }
    parse_vault(&fs::read(path)?)
}

/// Split raw vault bytes into their sections.
pub fn parse_vault(data: &[u8]) -> Result<RawVault> {
    if data.len() < PREFIX_LEN + HMAC_LEN {
        return Err(KeywardError::InvalidVaultFormat(
            "file too small to be a valid vault".into(),
        ));
    }
    if &data[0..4] != MAGIC {
        return Err(KeywardError::InvalidVaultFormat(
            "missing KWV1 magic bytes".into(),
        ));
    }

    let version = data[4];
    if version != CURRENT_VERSION {
        return Err(KeywardError::InvalidVaultFormat(format!(
            "unsupported version {version}, expected {CURRENT_VERSION}"
        )));
    }

    let header_len_u32 = u32::from_le_bytes(
        data[5..9]
            .try_into()
            .map_err(|_| KeywardError::InvalidVaultFormat("bad header length".into()))?,
    );
    let header_len = usize::try_from(header_len_u32).map_err(|_| {
        KeywardError::InvalidVaultFormat(format!(
            "header length {header_len_u32} exceeds platform address space"
        ))
    })?;

    let header_end = PREFIX_LEN
        .checked_add(header_len)
        .filter(|end| end + HMAC_LEN <= data.len())
        .ok_or_else(|| KeywardError::InvalidVaultFormat("header length exceeds file size".into()))?;

    let header_bytes = data[PREFIX_LEN..header_end].to_vec();
    let body_end = data.len() - HMAC_LEN;
    let body_bytes = data[header_end..body_end].to_vec();
    let stored_hmac = data[body_end..].to_vec();

    let header: VaultHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| KeywardError::InvalidVaultFormat(format!("header JSON: {e}")))?;

    Ok(RawVault {
        header,
        header_bytes,
        body_bytes,
        stored_hmac,
    })
}

/// HMAC-SHA256 over header + body bytes.
pub fn compute_hmac(hmac_key: &[u8], header_bytes: &[u8], body_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|e| KeywardError::HmacError(format!("invalid HMAC key: {e}")))?;
    mac.update(header_bytes);
    mac.update(body_bytes);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time HMAC check.
pub fn verify_hmac(
    hmac_key: &[u8],
    header_bytes: &[u8],
    body_bytes: &[u8],
    expected_hmac: &[u8],
) -> Result<()> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|e| KeywardError::HmacError(format!("invalid HMAC key: {e}")))?;
    mac.update(header_bytes);
    mac.update(body_bytes);
    mac.verify_slice(expected_hmac)
        .map_err(|_| KeywardError::HmacMismatch)
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
