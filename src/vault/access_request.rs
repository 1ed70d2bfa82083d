//! The access request workflow.
//!
//! A request moves `Pending -> Approved` or `Pending -> Rejected` exactly
//! once. All transitions happen under one write lock, so duplicate
//! pending requests and double resolutions cannot slip through.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy;
use super::secret::{Secret, SecretId};
use crate::audit::{emit, AuditEvent, AuditSink};
use crate::errors::{KeywardError, Result};
use crate::identity::{Identity, IdentityProvider, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

/// A user's ask for read access to a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,
    pub requester: UserId,
    pub secret: SecretId,
    pub status: RequestStatus,
    pub reason_request: String,
    #[serde(default)]
    pub reason_rejected: Option<String>,
    /// Snapshot of eligible reviewers taken when the request was filed.
    pub reviewers: BTreeSet<UserId>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub closed_by: Option<UserId>,
    #[serde(default)]
    pub closed: Option<DateTime<Utc>>,
}

impl AccessRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Superusers and stored reviewers may resolve, never the requester.
    pub fn can_be_reviewed_by(&self, user: &Identity) -> bool {
        user.id != self.requester && (user.is_superuser || self.reviewers.contains(&user.id))
    }

    /// Requester, reviewers and superusers may look at a request.
    pub fn is_visible_to(&self, user: &Identity) -> bool {
        user.is_superuser || user.id == self.requester || self.reviewers.contains(&user.id)
    }
}

/// Owns every access request.
pub struct AccessRequestWorkflow {
    requests: RwLock<BTreeMap<RequestId, AccessRequest>>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for AccessRequestWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRequestWorkflow").finish_non_exhaustive()
    }
}

impl AccessRequestWorkflow {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self::from_requests(Vec::new(), audit)
    }

    pub fn from_requests(requests: Vec<AccessRequest>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            requests: RwLock::new(requests.into_iter().map(|r| (r.id, r)).collect()),
            audit,
        }
    }

    pub fn requests(&self) -> Vec<AccessRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: RequestId) -> Option<AccessRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// File a request for read access to `secret`.
    ///
    /// The reviewer set is computed now and stored; later ACL changes do
    /// not alter who may resolve this request.
    pub fn create(
        &self,
        requester: &Identity,
        secret: &Secret,
        reason: &str,
        directory: &dyn IdentityProvider,
    ) -> Result<AccessRequest> {
        if !policy::is_visible(secret, requester) {
            return Err(KeywardError::Forbidden(format!(
                "{} cannot request a secret they cannot see",
                requester.id
            )));
        }
        if policy::is_readable(secret, requester) {
            return Err(KeywardError::Forbidden(format!(
                "{} can already read '{}'",
                requester.id, secret.name
            )));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(KeywardError::InvalidInput(
                "a reason for the request is required".into(),
            ));
        }

        let reviewers = policy::eligible_reviewers(secret, Some(&requester.id), directory);

        let request = {
            let mut requests = self.requests.write().unwrap_or_else(PoisonError::into_inner);
            if requests
                .values()
                .any(|r| r.is_pending() && r.requester == requester.id && r.secret == secret.id)
            {
                return Err(KeywardError::Conflict(format!(
                    "{} already has a pending request for '{}'",
                    requester.id, secret.name
                )));
            }

            let id = RequestId(requests.keys().next_back().map_or(1, |last| last.0 + 1));
            let request = AccessRequest {
                id,
                requester: requester.id.clone(),
                secret: secret.id,
                status: RequestStatus::Pending,
                reason_request: reason.to_string(),
                reason_rejected: None,
                reviewers,
                created: Utc::now(),
                closed_by: None,
                closed: None,
            };
            requests.insert(id, request.clone());
            request
        };

        tracing::info!(request = %request.id, secret = %secret.id, "access request filed");
        emit(
            self.audit.as_ref(),
            AuditEvent::info(
                &requester.id,
                format!(
                    "{} requested access to '{}' ({})",
                    requester.id, secret.name, secret.id
                ),
            )
            .secret(secret.id)
            .request(request.id),
        );
        Ok(request)
    }

    /// Lock the request for a transition and run the shared checks.
    fn resolve<F>(
        &self,
        id: RequestId,
        reviewer: &Identity,
        secret: &Secret,
        apply: F,
    ) -> Result<AccessRequest>
    where
        F: FnOnce(&mut AccessRequest),
    {
        let mut requests = self.requests.write().unwrap_or_else(PoisonError::into_inner);
        let request = requests
            .get_mut(&id)
            .ok_or_else(|| KeywardError::NotFound(format!("access request {id}")))?;

        if !request.is_pending() {
            return Err(KeywardError::InvalidState(format!(
                "access request {id} is already {}",
                request.status
            )));
        }
        if !request.can_be_reviewed_by(reviewer) {
            return Err(KeywardError::Forbidden(format!(
                "{} is not a reviewer of access request {id}",
                reviewer.id
            )));
        }
        if request.secret != secret.id {
            return Err(KeywardError::InvalidInput(format!(
                "access request {id} is not for secret {}",
                secret.id
            )));
        }

        apply(request);
        request.closed_by = Some(reviewer.id.clone());
        request.closed = Some(Utc::now());
        Ok(request.clone())
    }

    /// Approve a pending request and put the requester on the secret's
    /// allowed-users ACL.
    pub fn approve(
        &self,
        id: RequestId,
        reviewer: &Identity,
        secret: &mut Secret,
    ) -> Result<AccessRequest> {
        let request = self.resolve(id, reviewer, secret, |r| {
            r.status = RequestStatus::Approved;
        })?;
        secret.allowed_users.insert(request.requester.clone());

        tracing::info!(request = %id, secret = %secret.id, "access request approved");
        let message = format!(
            "{} granted access to '{}' ({}) for {}",
            reviewer.id, secret.name, secret.id, request.requester
        );
        let event = if request.reviewers.contains(&reviewer.id) {
            AuditEvent::info(&reviewer.id, message)
        } else {
            AuditEvent::warning(&reviewer.id, message)
        };
        emit(
            self.audit.as_ref(),
            event
                .secret(secret.id)
                .request(id)
                .user(&request.requester),
        );
        Ok(request)
    }

    /// Reject a pending request. The ACL is left untouched.
    pub fn reject(
        &self,
        id: RequestId,
        reviewer: &Identity,
        secret: &Secret,
        reason: Option<&str>,
    ) -> Result<AccessRequest> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let request = self.resolve(id, reviewer, secret, |r| {
            r.status = RequestStatus::Rejected;
            r.reason_rejected = reason.map(str::to_string);
        })?;

        tracing::info!(request = %id, secret = %secret.id, "access request rejected");
        emit(
            self.audit.as_ref(),
            AuditEvent::info(
                &reviewer.id,
                format!(
                    "{} denied access to '{}' ({}) for {}",
                    reviewer.id, secret.name, secret.id, request.requester
                ),
            )
            .secret(secret.id)
            .request(id)
            .user(&request.requester),
        );
        Ok(request)
    }

    /// Pending requests `user` may resolve, excluding their own.
    pub fn pending_reviewable_by(&self, user: &Identity) -> Vec<AccessRequest> {
        self.filtered(|r| r.is_pending() && r.can_be_reviewed_by(user))
    }

    /// Pending requests filed by `user`.
    pub fn pending_created_by(&self, user: &UserId) -> Vec<AccessRequest> {
        self.filtered(|r| r.is_pending() && &r.requester == user)
    }

    /// The caller's own pending request for `secret`, if any.
    pub fn pending_for(&self, user: &UserId, secret: SecretId) -> Option<AccessRequest> {
        self.filtered(|r| r.is_pending() && &r.requester == user && r.secret == secret)
            .into_iter()
            .next()
    }

    fn filtered(&self, keep: impl Fn(&AccessRequest) -> bool) -> Vec<AccessRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLevel, MemoryAuditSink};
    use crate::identity::directory::{Directory, DirectoryUser};
    use crate::vault::secret::{AccessPolicy, ContentType, SecretStatus};

    fn secret() -> Secret {
        Secret {
            id: SecretId(1),
            name: "payroll".into(),
            description: None,
            content_type: ContentType::Password,
            access_policy: AccessPolicy::Request,
            status: SecretStatus::Active,
            needs_changing_on_leave: true,
            created_by: UserId::new("alice"),
            created: Utc::now(),
            last_changed: None,
            last_read: None,
            url: None,
            username: None,
            filename: None,
            allowed_groups: BTreeSet::new(),
            allowed_users: BTreeSet::from([UserId::new("alice")]),
            current_revision: None,
        }
    }

    fn directory() -> Directory {
        Directory::new()
            .with_user(DirectoryUser::new("alice", "ta"))
            .with_user(DirectoryUser::new("bob", "tb"))
            .with_user(DirectoryUser::new("carol", "tc"))
            .with_user(DirectoryUser::new("root", "tr").superuser())
    }

    fn workflow() -> (AccessRequestWorkflow, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        (AccessRequestWorkflow::new(audit.clone()), audit)
    }

    #[test]
    fn create_snapshots_reviewers() {
        let (wf, audit) = workflow();
        let mut s = secret();
        let bob = Identity::new("bob");

        let req = wf.create(&bob, &s, "need for audit", &directory()).unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(req.reviewers, BTreeSet::from([UserId::new("alice")]));

        // Later ACL changes do not touch the stored reviewer set.
        s.allowed_users.insert(UserId::new("carol"));
        assert_eq!(wf.get(req.id).unwrap().reviewers, req.reviewers);
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn duplicate_pending_request_conflicts() {
        let (wf, _) = workflow();
        let s = secret();
        let bob = Identity::new("bob");
        wf.create(&bob, &s, "first", &directory()).unwrap();
        assert!(matches!(
            wf.create(&bob, &s, "second", &directory()),
            Err(KeywardError::Conflict(_))
        ));
    }

    #[test]
    fn readable_or_invisible_secrets_cannot_be_requested() {
        let (wf, _) = workflow();
        let s = secret();
        assert!(matches!(
            wf.create(&Identity::new("alice"), &s, "why", &directory()),
            Err(KeywardError::Forbidden(_))
        ));

        let mut hidden = secret();
        hidden.access_policy = AccessPolicy::Hidden;
        assert!(matches!(
            wf.create(&Identity::new("bob"), &hidden, "why", &directory()),
            Err(KeywardError::Forbidden(_))
        ));
    }

    #[test]
    fn approve_adds_requester_to_acl() {
        let (wf, _) = workflow();
        let mut s = secret();
        let req = wf
            .create(&Identity::new("bob"), &s, "on call", &directory())
            .unwrap();

        let approved = wf.approve(req.id, &Identity::new("alice"), &mut s).unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.closed_by, Some(UserId::new("alice")));
        assert!(approved.closed.is_some());
        assert!(s.allowed_users.contains(&UserId::new("bob")));
    }

    #[test]
    fn non_reviewer_is_forbidden() {
        let (wf, _) = workflow();
        let mut s = secret();
        let req = wf
            .create(&Identity::new("bob"), &s, "on call", &directory())
            .unwrap();
        assert!(matches!(
            wf.approve(req.id, &Identity::new("carol"), &mut s),
            Err(KeywardError::Forbidden(_))
        ));
        assert!(wf.get(req.id).unwrap().is_pending());
    }

    #[test]
    fn resolved_request_is_final() {
        let (wf, _) = workflow();
        let mut s = secret();
        let req = wf
            .create(&Identity::new("bob"), &s, "on call", &directory())
            .unwrap();
        let rejected = wf
            .reject(req.id, &Identity::new("alice"), &s, Some("not authorized"))
            .unwrap();
        assert_eq!(rejected.reason_rejected.as_deref(), Some("not authorized"));

        assert!(matches!(
            wf.approve(req.id, &Identity::new("alice"), &mut s),
            Err(KeywardError::InvalidState(_))
        ));
        assert!(matches!(
            wf.reject(req.id, &Identity::new("root").superuser(), &s, None),
            Err(KeywardError::InvalidState(_))
        ));
        assert_eq!(wf.get(req.id).unwrap(), rejected);
        assert!(!s.allowed_users.contains(&UserId::new("bob")));
    }

    #[test]
    fn superuser_outside_reviewers_is_logged_as_warning() {
        let (wf, audit) = workflow();
        let mut s = secret();
        let req = wf
            .create(&Identity::new("bob"), &s, "on call", &directory())
            .unwrap();
        wf.approve(req.id, &Identity::new("root").superuser(), &mut s)
            .unwrap();
        let last = audit.events().pop().unwrap();
        assert_eq!(last.level, AuditLevel::Warning);
    }

    #[test]
    fn listings_split_reviewable_and_own() {
        let (wf, _) = workflow();
        let s = secret();
        wf.create(&Identity::new("bob"), &s, "x", &directory())
            .unwrap();

        assert_eq!(wf.pending_reviewable_by(&Identity::new("alice")).len(), 1);
        assert!(wf.pending_reviewable_by(&Identity::new("bob")).is_empty());
        assert_eq!(wf.pending_created_by(&UserId::new("bob")).len(), 1);
        assert!(wf.pending_for(&UserId::new("bob"), s.id).is_some());

        // A superuser requester still cannot review their own request.
        let root_request = AccessRequest {
            requester: UserId::new("root"),
            ..wf.requests()[0].clone()
        };
        assert!(!root_request.can_be_reviewed_by(&Identity::new("root").superuser()));
    }
}
