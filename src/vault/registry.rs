//! The secret registry: the one entry point for every secret-level
//! operation.
//!
//! Each operation resolves the secret, asks the policy engine, and only
//! then touches the revision store or the access request workflow.
//! Secrets the caller cannot see are reported as `NotFound`, exactly like
//! secrets that do not exist.
//!
//! Locking: the registry map lock is held only long enough to find or
//! insert a secret handle. Each secret has its own `RwLock`; anything that
//! changes a secret (new revision, ACL change, request approval) holds it
//! for writing, and checks visibility on that same guard. Lock order is
//! secret, then revision log or request table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::access_request::{AccessRequest, AccessRequestWorkflow, RequestId};
use super::format::VaultSnapshot;
use super::policy;
use super::revision::{RevealedValue, RevisionId, RevisionInfo, RevisionStore};
use super::secret::{
    validate_name, NewSecret, Secret, SecretId, SecretStatus, SecretUpdate,
};
use crate::audit::{emit, AuditEvent, AuditSink};
use crate::crypto::Cipher;
use crate::errors::{KeywardError, Result};
use crate::identity::{GroupId, Identity, IdentityProvider, UserId};

/// Default cap on search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Character used to mask a readable value of known length.
const MASK_CHAR: char = '\u{2022}';

type SecretHandle = Arc<RwLock<Secret>>;

fn read(handle: &SecretHandle) -> RwLockReadGuard<'_, Secret> {
    handle.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(handle: &SecretHandle) -> RwLockWriteGuard<'_, Secret> {
    handle.write().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the caller needs to render a secret's page.
#[derive(Debug, Clone)]
pub struct SecretDetail {
    pub secret: Secret,
    pub readable: bool,
    /// `"•" x length` of the current value, only when readable.
    pub placeholder: Option<String>,
    /// The caller's own pending request, only when not readable.
    pub pending_request: Option<AccessRequest>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: SecretId,
    pub name: String,
    pub readable: bool,
}

/// The collaborators a registry is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn IdentityProvider>,
    pub cipher: Arc<dyn Cipher>,
    pub audit: Arc<dyn AuditSink>,
}

/// Composition root for secrets, revisions and access requests.
pub struct SecretRegistry {
    secrets: RwLock<BTreeMap<SecretId, SecretHandle>>,
    next_secret_id: AtomicU64,
    revisions: RevisionStore,
    requests: AccessRequestWorkflow,
    directory: Arc<dyn IdentityProvider>,
    audit: Arc<dyn AuditSink>,
    search_limit: usize,
}

impl fmt::Debug for SecretRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRegistry")
            .field("secrets", &self.secret_count())
            .field("revisions", &self.revisions)
            .finish_non_exhaustive()
    }
}

impl SecretRegistry {
    /// An empty registry.
    pub fn new(collaborators: Collaborators) -> Self {
        let Collaborators {
            directory,
            cipher,
            audit,
        } = collaborators;
        Self {
            secrets: RwLock::new(BTreeMap::new()),
            next_secret_id: AtomicU64::new(1),
            revisions: RevisionStore::new(cipher, audit.clone()),
            requests: AccessRequestWorkflow::new(audit.clone()),
            directory,
            audit,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    /// Rebuild a registry from a persisted snapshot.
    pub fn restore(snapshot: VaultSnapshot, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            directory,
            cipher,
            audit,
        } = collaborators;

        let revisions = RevisionStore::from_records(snapshot.revisions, cipher, audit.clone())?;
        let mut secrets = BTreeMap::new();
        for secret in snapshot.secrets {
            if let Some(current) = secret.current_revision {
                if revisions.owner_of(current) != Some(secret.id) {
                    return Err(KeywardError::InvalidVaultFormat(format!(
                        "secret {} points at revision {current} it does not own",
                        secret.id
                    )));
                }
            }
            secrets.insert(secret.id, Arc::new(RwLock::new(secret)));
        }
        let next_id = secrets.keys().next_back().map_or(1, |id: &SecretId| id.0 + 1);

        Ok(Self {
            secrets: RwLock::new(secrets),
            next_secret_id: AtomicU64::new(next_id),
            revisions,
            requests: AccessRequestWorkflow::from_requests(snapshot.requests, audit.clone()),
            directory,
            audit,
            search_limit: DEFAULT_SEARCH_LIMIT,
        })
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    /// A consistent copy of the whole registry for persistence.
    pub fn snapshot(&self) -> VaultSnapshot {
        VaultSnapshot {
            secrets: self.handles().iter().map(|h| read(h).clone()).collect(),
            revisions: self.revisions.records(),
            requests: self.requests.requests(),
        }
    }

    /// Number of secrets, deleted ones included.
    pub fn secret_count(&self) -> usize {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn directory(&self) -> &dyn IdentityProvider {
        self.directory.as_ref()
    }

    // ------------------------------------------------------------------
    // Lookup helpers
    // ------------------------------------------------------------------

    fn handles(&self) -> Vec<SecretHandle> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn handle(&self, id: SecretId) -> Option<SecretHandle> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn handle_of(&self, id: SecretId) -> Result<SecretHandle> {
        self.handle(id)
            .ok_or_else(|| KeywardError::NotFound(format!("secret {id}")))
    }

    /// `NotFound` unless the secret is active and `user` may see it. Always
    /// called on a guard the caller keeps, so a concurrent delete cannot
    /// land between the check and the operation.
    fn check_visible(secret: &Secret, user: &Identity) -> Result<()> {
        if secret.is_active() && policy::is_visible(secret, user) {
            Ok(())
        } else {
            tracing::debug!(secret = %secret.id, user = %user.id, "secret not visible");
            Err(KeywardError::NotFound(format!("secret {}", secret.id)))
        }
    }

    fn visible_read<'a>(
        handle: &'a SecretHandle,
        user: &Identity,
    ) -> Result<RwLockReadGuard<'a, Secret>> {
        let secret = read(handle);
        Self::check_visible(&secret, user)?;
        Ok(secret)
    }

    fn visible_write<'a>(
        handle: &'a SecretHandle,
        user: &Identity,
    ) -> Result<RwLockWriteGuard<'a, Secret>> {
        let secret = write(handle);
        Self::check_visible(&secret, user)?;
        Ok(secret)
    }

    fn ensure_readable(secret: &Secret, user: &Identity) -> Result<()> {
        if policy::is_readable(secret, user) {
            Ok(())
        } else {
            tracing::debug!(secret = %secret.id, user = %user.id, "read access denied");
            Err(KeywardError::Forbidden(format!(
                "{} has no access to '{}'",
                user.id, secret.name
            )))
        }
    }

    fn ensure_superuser(user: &Identity) -> Result<()> {
        if user.is_superuser {
            Ok(())
        } else {
            Err(KeywardError::Forbidden(format!(
                "{} is not a superuser",
                user.id
            )))
        }
    }

    fn validate_acl(&self, groups: &BTreeSet<GroupId>, users: &BTreeSet<UserId>) -> Result<()> {
        if let Some(group) = groups.iter().find(|g| !self.directory.group_exists(g)) {
            return Err(KeywardError::InvalidInput(format!("unknown group '{group}'")));
        }
        if let Some(user) = users.iter().find(|u| self.directory.identity(u).is_none()) {
            return Err(KeywardError::InvalidInput(format!("unknown user '{user}'")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Secret lifecycle
    // ------------------------------------------------------------------

    /// Create a secret with its first value. The creator is always put on
    /// the allowed-users ACL.
    pub fn create_secret(&self, user: &Identity, new: NewSecret) -> Result<Secret> {
        validate_name(&new.name)?;
        self.validate_acl(&new.allowed_groups, &new.allowed_users)?;

        let NewSecret {
            name,
            description,
            access_policy,
            needs_changing_on_leave,
            url,
            username,
            filename,
            allowed_groups,
            mut allowed_users,
            payload,
        } = new;
        allowed_users.insert(user.id.clone());

        let id = SecretId(self.next_secret_id.fetch_add(1, Ordering::SeqCst));
        let mut secret = Secret {
            id,
            name: name.trim().to_string(),
            description,
            content_type: payload.content_type(),
            access_policy,
            status: SecretStatus::Active,
            needs_changing_on_leave,
            created_by: user.id.clone(),
            created: Utc::now(),
            last_changed: None,
            last_read: None,
            url,
            username,
            filename,
            allowed_groups,
            allowed_users,
            current_revision: None,
        };

        // Nobody else can reach the secret before it is inserted, so the
        // first revision is in place by the time it becomes visible.
        self.revisions
            .create_revision(&mut secret, &user.id, &payload)?;

        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(RwLock::new(secret.clone())));

        tracing::info!(secret = %id, policy = %secret.access_policy, "secret created");
        emit(
            self.audit.as_ref(),
            AuditEvent::info(
                &user.id,
                format!("{} created '{}' ({id})", user.id, secret.name),
            )
            .secret(id),
        );
        Ok(secret)
    }

    /// Change metadata, ACL and/or value. Requires read access.
    pub fn edit_secret(&self, user: &Identity, id: SecretId, update: SecretUpdate) -> Result<Secret> {
        let handle = self.handle_of(id)?;
        let mut secret = Self::visible_write(&handle, user)?;
        Self::ensure_readable(&secret, user)?;

        if update.is_empty() {
            return Ok(secret.clone());
        }
        if let Some(name) = &update.name {
            validate_name(name)?;
        }
        self.validate_acl(
            update.allowed_groups.as_ref().unwrap_or(&BTreeSet::new()),
            update.allowed_users.as_ref().unwrap_or(&BTreeSet::new()),
        )?;

        // Stage the edit so a failed revision write leaves nothing half-applied.
        let mut staged = secret.clone();
        let SecretUpdate {
            name,
            description,
            access_policy,
            needs_changing_on_leave,
            url,
            username,
            filename,
            allowed_groups,
            allowed_users,
            payload,
        } = update;
        if let Some(name) = name {
            staged.name = name.trim().to_string();
        }
        if let Some(description) = description {
            staged.description = description;
        }
        if let Some(policy) = access_policy {
            staged.access_policy = policy;
        }
        if let Some(flag) = needs_changing_on_leave {
            staged.needs_changing_on_leave = flag;
        }
        if let Some(url) = url {
            staged.url = url;
        }
        if let Some(username) = username {
            staged.username = username;
        }
        if let Some(filename) = filename {
            staged.filename = filename;
        }
        if let Some(groups) = allowed_groups {
            staged.allowed_groups = groups;
        }
        if let Some(users) = allowed_users {
            staged.allowed_users = users;
        }
        if let Some(payload) = payload {
            self.revisions
                .create_revision(&mut staged, &user.id, &payload)?;
        }
        *secret = staged;

        tracing::info!(secret = %id, "secret edited");
        emit(
            self.audit.as_ref(),
            AuditEvent::info(
                &user.id,
                format!("{} edited '{}' ({id})", user.id, secret.name),
            )
            .secret(id),
        );
        Ok(secret.clone())
    }

    /// Soft-delete: the secret disappears from lookups, its revisions stay.
    pub fn delete_secret(&self, user: &Identity, id: SecretId) -> Result<()> {
        let handle = self.handle_of(id)?;
        let mut secret = Self::visible_write(&handle, user)?;
        Self::ensure_readable(&secret, user)?;

        secret.status = SecretStatus::Deleted;

        tracing::info!(secret = %id, "secret deleted");
        let revision = secret
            .current_revision
            .map_or_else(|| "-".to_string(), |r| r.to_string());
        let mut event = AuditEvent::info(
            &user.id,
            format!("{} deleted '{}' ({id}:{revision})", user.id, secret.name),
        )
        .secret(id);
        if let Some(rev) = secret.current_revision {
            event = event.revision(rev);
        }
        emit(self.audit.as_ref(), event);
        Ok(())
    }

    /// Extend the ACL directly. Only users who can read the secret may
    /// share it. Returns the updated secret.
    pub fn share(
        &self,
        user: &Identity,
        id: SecretId,
        groups: &BTreeSet<GroupId>,
        users: &BTreeSet<UserId>,
    ) -> Result<Secret> {
        let handle = self.handle_of(id)?;
        let mut secret = Self::visible_write(&handle, user)?;
        Self::ensure_readable(&secret, user)?;
        self.validate_acl(groups, users)?;

        for group in groups {
            if secret.allowed_groups.insert(group.clone()) {
                emit(
                    self.audit.as_ref(),
                    AuditEvent::info(
                        &user.id,
                        format!("{} shared '{}' with {group}", user.id, secret.name),
                    )
                    .secret(id)
                    .group(group),
                );
            }
        }
        for target in users {
            if secret.allowed_users.insert(target.clone()) {
                emit(
                    self.audit.as_ref(),
                    AuditEvent::info(
                        &user.id,
                        format!("{} shared '{}' with {target}", user.id, secret.name),
                    )
                    .secret(id)
                    .user(target),
                );
            }
        }
        tracing::info!(secret = %id, "secret shared");
        Ok(secret.clone())
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Metadata of a visible secret.
    pub fn secret(&self, user: &Identity, id: SecretId) -> Result<Secret> {
        let handle = self.handle_of(id)?;
        let secret = Self::visible_read(&handle, user)?.clone();
        Ok(secret)
    }

    pub fn secret_detail(&self, user: &Identity, id: SecretId) -> Result<SecretDetail> {
        let handle = self.handle_of(id)?;
        let secret = Self::visible_read(&handle, user)?.clone();
        let readable = policy::is_readable(&secret, user);

        let placeholder = if readable {
            self.revisions
                .placeholder_length(&secret)
                .map(|len| MASK_CHAR.to_string().repeat(len))
        } else {
            None
        };
        let pending_request = if readable {
            None
        } else {
            self.requests.pending_for(&user.id, id)
        };

        Ok(SecretDetail {
            secret,
            readable,
            placeholder,
            pending_request,
        })
    }

    fn warn_on_override(&self, secret: &Secret, user: &Identity, revision: RevisionId) {
        if policy::reads_by_override(secret, user) {
            emit(
                self.audit.as_ref(),
                AuditEvent::warning(
                    &user.id,
                    format!(
                        "{} used superuser privileges to read '{}' ({}:{revision})",
                        user.id, secret.name, secret.id
                    ),
                )
                .secret(secret.id)
                .revision(revision),
            );
        }
    }

    fn touch_last_read(handle: &SecretHandle) {
        let mut secret = write(handle);
        let now = Utc::now();
        if secret.last_read.map_or(true, |prev| prev < now) {
            secret.last_read = Some(now);
        }
    }

    /// Decrypt the current value.
    pub fn read_value(&self, user: &Identity, id: SecretId) -> Result<RevealedValue> {
        let handle = self.handle_of(id)?;
        let value = {
            let secret = Self::visible_read(&handle, user)?;
            Self::ensure_readable(&secret, user)?;
            let value = self.revisions.read_current_value(&secret, &user.id)?;
            self.warn_on_override(&secret, user, value.revision);
            value
        };
        Self::touch_last_read(&handle);
        Ok(value)
    }

    /// Decrypt any retained revision by direct reference.
    pub fn read_revision_value(&self, user: &Identity, revision: RevisionId) -> Result<RevealedValue> {
        let not_found = || KeywardError::NotFound(format!("revision {revision}"));
        let secret_id = self.revisions.owner_of(revision).ok_or_else(not_found)?;
        let handle = self.handle_of(secret_id).map_err(|_| not_found())?;
        let value = {
            let secret = Self::visible_read(&handle, user).map_err(|_| not_found())?;
            Self::ensure_readable(&secret, user)?;
            let value = self.revisions.read_revision_value(&secret, revision, &user.id)?;
            self.warn_on_override(&secret, user, revision);
            value
        };
        Self::touch_last_read(&handle);
        Ok(value)
    }

    /// Revision metadata of a readable secret, oldest first.
    pub fn history(&self, user: &Identity, id: SecretId) -> Result<Vec<RevisionInfo>> {
        let handle = self.handle_of(id)?;
        let secret = Self::visible_read(&handle, user)?;
        Self::ensure_readable(&secret, user)?;
        Ok(self.revisions.history(&secret))
    }

    /// Metadata of one revision by direct reference.
    pub fn revision(&self, user: &Identity, revision: RevisionId) -> Result<RevisionInfo> {
        let not_found = || KeywardError::NotFound(format!("revision {revision}"));
        let secret_id = self.revisions.owner_of(revision).ok_or_else(not_found)?;
        let handle = self.handle_of(secret_id).map_err(|_| not_found())?;
        let secret = Self::visible_read(&handle, user).map_err(|_| not_found())?;
        Self::ensure_readable(&secret, user)?;
        self.revisions
            .info(revision, secret.current_revision)
            .ok_or_else(not_found)
    }

    // ------------------------------------------------------------------
    // Listing and search
    // ------------------------------------------------------------------

    fn collect<F>(&self, keep: F) -> Vec<Secret>
    where
        F: for<'a> Fn(&'a [Secret]) -> Vec<&'a Secret>,
    {
        let all: Vec<Secret> = self.handles().iter().map(|h| read(h).clone()).collect();
        let mut picked: Vec<Secret> = keep(&all).into_iter().cloned().collect();
        picked.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        picked
    }

    /// Active secrets `user` can see, by name.
    pub fn list_visible(&self, user: &Identity) -> Vec<Secret> {
        self.collect(|all| policy::all_visible_to(all, user))
    }

    /// Active secrets `user` can read, by name.
    pub fn list_readable(&self, user: &Identity) -> Vec<Secret> {
        self.collect(|all| policy::all_readable_by(all, user))
    }

    /// Visible secrets matching `term`, readable ones first, capped at the
    /// configured search limit.
    pub fn search(&self, user: &Identity, term: &str) -> Vec<SearchHit> {
        let needle = term.trim().to_lowercase();
        let mut hits: Vec<SearchHit> = self
            .list_visible(user)
            .into_iter()
            .filter(|s| s.matches(&needle))
            .map(|s| SearchHit {
                readable: policy::is_readable(&s, user),
                id: s.id,
                name: s.name,
            })
            .collect();
        // Stable sort keeps name order within each group.
        hits.sort_by_key(|hit| !hit.readable);
        hits.truncate(self.search_limit);
        hits
    }

    // ------------------------------------------------------------------
    // Access requests
    // ------------------------------------------------------------------

    /// Ask for read access to a visible secret.
    pub fn request_access(&self, user: &Identity, id: SecretId, reason: &str) -> Result<AccessRequest> {
        let handle = self.handle_of(id)?;
        let secret = Self::visible_read(&handle, user)?;
        self.requests
            .create(user, &secret, reason, self.directory.as_ref())
    }

    /// The secret a request targets, locked for writing. A secret deleted
    /// since the request was filed makes the request `NotFound`.
    fn lock_request_target<'a>(
        handle: &'a SecretHandle,
        request: &AccessRequest,
    ) -> Result<RwLockWriteGuard<'a, Secret>> {
        let secret = write(handle);
        if !secret.is_active() {
            return Err(KeywardError::NotFound(format!("access request {}", request.id)));
        }
        Ok(secret)
    }

    fn request_handle(&self, request: &AccessRequest) -> Result<SecretHandle> {
        self.handle(request.secret)
            .ok_or_else(|| KeywardError::NotFound(format!("access request {}", request.id)))
    }

    pub fn approve_request(&self, reviewer: &Identity, id: RequestId) -> Result<AccessRequest> {
        let request = self
            .requests
            .get(id)
            .ok_or_else(|| KeywardError::NotFound(format!("access request {id}")))?;
        let handle = self.request_handle(&request)?;
        let mut secret = Self::lock_request_target(&handle, &request)?;
        self.requests.approve(id, reviewer, &mut secret)
    }

    pub fn reject_request(
        &self,
        reviewer: &Identity,
        id: RequestId,
        reason: Option<&str>,
    ) -> Result<AccessRequest> {
        let request = self
            .requests
            .get(id)
            .ok_or_else(|| KeywardError::NotFound(format!("access request {id}")))?;
        let handle = self.request_handle(&request)?;
        let secret = Self::lock_request_target(&handle, &request)?;
        self.requests.reject(id, reviewer, &secret, reason)
    }

    /// A request the caller is involved in.
    pub fn access_request(&self, user: &Identity, id: RequestId) -> Result<AccessRequest> {
        self.requests
            .get(id)
            .filter(|r| r.is_visible_to(user))
            .ok_or_else(|| KeywardError::NotFound(format!("access request {id}")))
    }

    fn secret_is_active(&self, id: SecretId) -> bool {
        self.handle(id).is_some_and(|h| read(&h).is_active())
    }

    /// Pending requests `user` may resolve (never their own).
    pub fn pending_reviewable_by(&self, user: &Identity) -> Vec<AccessRequest> {
        self.requests
            .pending_reviewable_by(user)
            .into_iter()
            .filter(|r| self.secret_is_active(r.secret))
            .collect()
    }

    /// Pending requests filed by `user`.
    pub fn pending_created_by(&self, user: &Identity) -> Vec<AccessRequest> {
        self.requests
            .pending_created_by(&user.id)
            .into_iter()
            .filter(|r| self.secret_is_active(r.secret))
            .collect()
    }

    // ------------------------------------------------------------------
    // Departures
    // ------------------------------------------------------------------

    /// Active secrets flagged for rotation whose current value `departed`
    /// has read. Superusers only.
    pub fn rotation_due_on_departure(&self, actor: &Identity, departed: &UserId) -> Result<Vec<Secret>> {
        Self::ensure_superuser(actor)?;
        Ok(self.collect(|all| {
            all.iter()
                .filter(|s| s.is_active() && s.needs_changing_on_leave)
                .filter(|s| {
                    s.current_revision
                        .is_some_and(|rev| self.revisions.was_read_by(rev, departed))
                })
                .collect()
        }))
    }
}
