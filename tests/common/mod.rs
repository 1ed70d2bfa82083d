//! Shared fixture: a small team directory and an in-memory registry.

#![allow(dead_code)]

use std::sync::Arc;

use keyward::audit::MemoryAuditSink;
use keyward::crypto::{AesGcmCipher, MasterKey};
use keyward::identity::{Directory, DirectoryUser, Identity, IdentityProvider};
use keyward::vault::{
    AccessPolicy, Collaborators, NewSecret, Secret, SecretPayload, SecretRegistry,
};

pub struct Team {
    pub registry: SecretRegistry,
    pub audit: Arc<MemoryAuditSink>,
    pub cipher: Arc<AesGcmCipher>,
    pub directory: Arc<Directory>,
}

/// alice, bob: ops. carol: finance. dave: no groups. root, sue: superusers.
pub fn directory() -> Directory {
    Directory::new()
        .with_user(DirectoryUser::new("alice", "tok-alice").in_groups(["ops"]))
        .with_user(DirectoryUser::new("bob", "tok-bob").in_groups(["ops"]))
        .with_user(DirectoryUser::new("carol", "tok-carol").in_groups(["finance"]))
        .with_user(DirectoryUser::new("dave", "tok-dave"))
        .with_user(DirectoryUser::new("root", "tok-root").superuser())
        .with_user(DirectoryUser::new("sue", "tok-sue").superuser())
        .with_group("auditors")
}

pub fn team() -> Team {
    let directory = Arc::new(directory());
    let audit = Arc::new(MemoryAuditSink::new());
    let cipher = Arc::new(AesGcmCipher::new(&MasterKey::new([42u8; 32])).unwrap());
    let registry = SecretRegistry::new(Collaborators {
        directory: directory.clone(),
        cipher: cipher.clone(),
        audit: audit.clone(),
    });
    Team {
        registry,
        audit,
        cipher,
        directory,
    }
}

impl Team {
    pub fn user(&self, name: &str) -> Identity {
        self.directory
            .resolve_user(&format!("tok-{name}"))
            .unwrap()
    }

    /// `owner` creates a password secret with `policy`.
    pub fn password(&self, owner: &str, name: &str, policy: AccessPolicy, value: &str) -> Secret {
        self.registry
            .create_secret(
                &self.user(owner),
                NewSecret::new(name, policy, SecretPayload::password(value)),
            )
            .unwrap()
    }
}
