//! Cryptographic primitives for Keyward.
//!
//! This module provides:
//! - The `Cipher` collaborator used by the revision store (`cipher`)
//! - AES-256-GCM sealing and opening of byte buffers (`encryption`)
//! - Argon2id passphrase-based master key derivation (`kdf`)
//! - HKDF-based data key and HMAC key derivation (`keys`)

pub mod cipher;
pub mod encryption;
pub mod kdf;
pub mod keys;

pub use cipher::{AesGcmCipher, Cipher};
pub use encryption::{open, seal};
pub use kdf::{derive_master_key, generate_salt, Argon2Params};
pub use keys::MasterKey;
