//! Integration tests for the secret registry: authorization, the grant
//! and rejection flows, revision history, search and departure checks.

mod common;

use std::collections::BTreeSet;

use keyward::audit::AuditLevel;
use keyward::errors::KeywardError;
use keyward::identity::{GroupId, UserId};
use keyward::vault::{
    policy, AccessPolicy, ContentType, NewSecret, RequestStatus, RevisionId, SecretId,
    SecretPayload, SecretUpdate,
};

use common::team;

#[test]
fn grant_flow_gives_requester_read_access() {
    let t = team();
    let s = t.password("alice", "db-prod", AccessPolicy::Request, "pw");
    let carol = t.user("carol");

    let request = t
        .registry
        .request_access(&carol, s.id, "need for audit")
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.reviewers, BTreeSet::from([UserId::new("alice")]));

    let approved = t
        .registry
        .approve_request(&t.user("alice"), request.id)
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.closed_by, Some(UserId::new("alice")));
    assert!(approved.closed.is_some());

    let secret = t.registry.secret(&carol, s.id).unwrap();
    assert!(secret.allowed_users.contains(&carol.id));
    assert!(policy::is_readable(&secret, &carol));
    assert_eq!(
        t.registry.read_value(&carol, s.id).unwrap().payload,
        SecretPayload::password("pw")
    );
}

#[test]
fn rejection_leaves_no_access() {
    let t = team();
    let s = t.password("alice", "db-prod", AccessPolicy::Request, "pw");
    let carol = t.user("carol");

    let request = t.registry.request_access(&carol, s.id, "please").unwrap();
    let rejected = t
        .registry
        .reject_request(&t.user("alice"), request.id, Some("not authorized"))
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.reason_rejected.as_deref(), Some("not authorized"));

    let secret = t.registry.secret(&carol, s.id).unwrap();
    assert!(!policy::is_readable(&secret, &carol));
    assert!(matches!(
        t.registry.read_value(&carol, s.id),
        Err(KeywardError::Forbidden(_))
    ));
}

#[test]
fn resolved_requests_stay_resolved() {
    let t = team();
    let s = t.password("alice", "db-prod", AccessPolicy::Request, "pw");
    let carol = t.user("carol");
    let alice = t.user("alice");

    let request = t.registry.request_access(&carol, s.id, "please").unwrap();
    let rejected = t
        .registry
        .reject_request(&alice, request.id, Some("no"))
        .unwrap();

    assert!(matches!(
        t.registry.approve_request(&alice, request.id),
        Err(KeywardError::InvalidState(_))
    ));
    assert!(matches!(
        t.registry.reject_request(&t.user("root"), request.id, Some("again")),
        Err(KeywardError::InvalidState(_))
    ));
    assert_eq!(t.registry.access_request(&carol, request.id).unwrap(), rejected);
}

#[test]
fn hidden_secret_is_not_found_for_outsiders() {
    let t = team();
    let s = t.password("alice", "root-ca", AccessPolicy::Hidden, "key");
    let dave = t.user("dave");

    assert!(matches!(
        t.registry.secret(&dave, s.id),
        Err(KeywardError::NotFound(_))
    ));
    assert!(matches!(
        t.registry.read_value(&dave, s.id),
        Err(KeywardError::NotFound(_))
    ));
    assert!(matches!(
        t.registry.request_access(&dave, s.id, "let me in"),
        Err(KeywardError::NotFound(_))
    ));

    // Indistinguishable from a secret that does not exist.
    assert!(matches!(
        t.registry.secret(&dave, SecretId(999)),
        Err(KeywardError::NotFound(_))
    ));
    assert!(t.registry.list_visible(&dave).is_empty());
}

#[test]
fn any_policy_is_open_to_everyone() {
    let t = team();
    let s = t.password("alice", "wifi", AccessPolicy::Any, "guest123");
    for name in ["bob", "carol", "dave", "root"] {
        let user = t.user(name);
        assert_eq!(
            t.registry.read_value(&user, s.id).unwrap().payload,
            SecretPayload::password("guest123")
        );
    }
}

#[test]
fn request_for_readable_secret_is_forbidden() {
    let t = team();
    let s = t.password("alice", "wifi", AccessPolicy::Any, "guest");
    assert!(matches!(
        t.registry.request_access(&t.user("dave"), s.id, "why not"),
        Err(KeywardError::Forbidden(_))
    ));
}

#[test]
fn duplicate_pending_request_conflicts() {
    let t = team();
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    let carol = t.user("carol");

    t.registry.request_access(&carol, s.id, "first").unwrap();
    let err = t.registry.request_access(&carol, s.id, "second").unwrap_err();
    assert!(matches!(err, KeywardError::Conflict(_)));
    assert!(err.is_retryable());
}

#[test]
fn outsiders_cannot_review() {
    let t = team();
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    let request = t
        .registry
        .request_access(&t.user("carol"), s.id, "please")
        .unwrap();

    assert!(matches!(
        t.registry.approve_request(&t.user("dave"), request.id),
        Err(KeywardError::Forbidden(_))
    ));
    assert!(matches!(
        t.registry.access_request(&t.user("dave"), request.id),
        Err(KeywardError::NotFound(_))
    ));
}

#[test]
fn superuser_override_approval_is_a_warning() {
    let t = team();
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    let request = t
        .registry
        .request_access(&t.user("carol"), s.id, "please")
        .unwrap();

    t.registry
        .approve_request(&t.user("root"), request.id)
        .unwrap();

    let last = t.audit.events().pop().unwrap();
    assert_eq!(last.level, AuditLevel::Warning);
    assert_eq!(last.subject.request, Some(request.id));
}

#[test]
fn superuser_read_without_acl_is_a_warning() {
    let t = team();
    let s = t.password("alice", "db", AccessPolicy::Hidden, "pw");
    let value = t.registry.read_value(&t.user("root"), s.id).unwrap();
    assert_eq!(value.payload, SecretPayload::password("pw"));

    let warnings: Vec<_> = t
        .audit
        .events()
        .into_iter()
        .filter(|e| e.level == AuditLevel::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].actor, UserId::new("root"));
}

#[test]
fn revision_history_keeps_old_values() {
    let t = team();
    let alice = t.user("alice");
    let s = t.password("alice", "api", AccessPolicy::Request, "pw1");

    t.registry
        .edit_secret(
            &alice,
            s.id,
            SecretUpdate {
                payload: Some(SecretPayload::password("pw2")),
                ..SecretUpdate::default()
            },
        )
        .unwrap();

    let current = t.registry.read_value(&alice, s.id).unwrap();
    assert_eq!(current.payload, SecretPayload::password("pw2"));

    let history = t.registry.history(&alice, s.id).unwrap();
    assert_eq!(history.len(), 2);
    let first = &history[0];
    assert!(!first.is_current);
    assert_eq!(first.set_by, alice.id);
    assert!(first.accessed_by.is_empty());

    let old = t.registry.read_revision_value(&alice, first.id).unwrap();
    assert_eq!(old.payload, SecretPayload::password("pw1"));

    let first_after = t.registry.revision(&alice, first.id).unwrap();
    let current_after = t.registry.revision(&alice, current.revision).unwrap();
    assert_eq!(first_after.accessed_by, BTreeSet::from([alice.id.clone()]));
    assert!(current_after.is_current);
}

#[test]
fn reading_twice_records_reader_once() {
    let t = team();
    let s = t.password("alice", "api", AccessPolicy::Any, "pw");
    let bob = t.user("bob");

    let first = t.registry.read_value(&bob, s.id).unwrap();
    t.registry.read_value(&bob, s.id).unwrap();

    let info = t.registry.revision(&bob, first.revision).unwrap();
    assert_eq!(info.accessed_by, BTreeSet::from([bob.id.clone()]));
    assert!(t.registry.secret(&bob, s.id).unwrap().last_read.is_some());
}

#[test]
fn detail_masks_value_and_shows_own_request() {
    let t = team();
    let s = t.password("alice", "api", AccessPolicy::Request, "héllo");

    let detail = t.registry.secret_detail(&t.user("alice"), s.id).unwrap();
    assert!(detail.readable);
    assert_eq!(detail.placeholder.as_deref(), Some("\u{2022}\u{2022}\u{2022}\u{2022}\u{2022}"));
    assert!(detail.pending_request.is_none());

    let carol = t.user("carol");
    let request = t.registry.request_access(&carol, s.id, "please").unwrap();
    let detail = t.registry.secret_detail(&carol, s.id).unwrap();
    assert!(!detail.readable);
    assert!(detail.placeholder.is_none());
    assert_eq!(detail.pending_request.map(|r| r.id), Some(request.id));
}

#[test]
fn group_acl_grants_read_and_feeds_reviewers() {
    let t = team();
    let s = t
        .registry
        .create_secret(
            &t.user("alice"),
            NewSecret::new("ops-db", AccessPolicy::Request, SecretPayload::password("x"))
                .allow_group("ops"),
        )
        .unwrap();

    assert!(t.registry.read_value(&t.user("bob"), s.id).is_ok());

    let request = t
        .registry
        .request_access(&t.user("carol"), s.id, "on call")
        .unwrap();
    assert_eq!(
        request.reviewers,
        BTreeSet::from([UserId::new("alice"), UserId::new("bob")])
    );
    let pending = t.registry.pending_reviewable_by(&t.user("bob"));
    assert_eq!(pending.len(), 1);
    assert!(t.registry.pending_reviewable_by(&t.user("carol")).is_empty());
    assert_eq!(t.registry.pending_created_by(&t.user("carol")).len(), 1);
}

#[test]
fn reviewers_are_snapshotted_at_creation() {
    let t = team();
    let alice = t.user("alice");
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    let request = t
        .registry
        .request_access(&t.user("carol"), s.id, "please")
        .unwrap();

    // bob joins the ACL after the request was filed.
    t.registry
        .share(&alice, s.id, &BTreeSet::new(), &BTreeSet::from([UserId::new("bob")]))
        .unwrap();

    assert!(matches!(
        t.registry.approve_request(&t.user("bob"), request.id),
        Err(KeywardError::Forbidden(_))
    ));
    assert!(t.registry.approve_request(&alice, request.id).is_ok());
}

#[test]
fn share_requires_read_access_and_known_targets() {
    let t = team();
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    let groups = BTreeSet::from([GroupId::new("finance")]);

    assert!(matches!(
        t.registry.share(&t.user("carol"), s.id, &groups, &BTreeSet::new()),
        Err(KeywardError::Forbidden(_))
    ));
    assert!(matches!(
        t.registry.share(
            &t.user("alice"),
            s.id,
            &BTreeSet::from([GroupId::new("nope")]),
            &BTreeSet::new()
        ),
        Err(KeywardError::InvalidInput(_))
    ));

    t.registry
        .share(&t.user("alice"), s.id, &groups, &BTreeSet::new())
        .unwrap();
    assert!(t.registry.read_value(&t.user("carol"), s.id).is_ok());
}

#[test]
fn editing_the_acl_can_revoke_access() {
    let t = team();
    let alice = t.user("alice");
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    t.registry
        .share(
            &alice,
            s.id,
            &BTreeSet::from([GroupId::new("finance")]),
            &BTreeSet::from([UserId::new("dave")]),
        )
        .unwrap();
    assert!(t.registry.read_value(&t.user("carol"), s.id).is_ok());
    assert!(t.registry.read_value(&t.user("dave"), s.id).is_ok());

    let edited = t
        .registry
        .edit_secret(
            &alice,
            s.id,
            SecretUpdate {
                allowed_groups: Some(BTreeSet::new()),
                allowed_users: Some(BTreeSet::from([UserId::new("alice")])),
                ..SecretUpdate::default()
            },
        )
        .unwrap();

    assert!(edited.allowed_groups.is_empty());
    assert!(matches!(
        t.registry.read_value(&t.user("carol"), s.id),
        Err(KeywardError::Forbidden(_))
    ));
    assert!(matches!(
        t.registry.read_value(&t.user("dave"), s.id),
        Err(KeywardError::Forbidden(_))
    ));
    assert!(t.registry.read_value(&alice, s.id).is_ok());
}

#[test]
fn deleted_secrets_disappear_but_keep_revisions() {
    let t = team();
    let alice = t.user("alice");
    let s = t.password("alice", "old", AccessPolicy::Any, "pw");
    let rev = s.current_revision.unwrap();

    t.registry.delete_secret(&alice, s.id).unwrap();

    assert!(matches!(
        t.registry.secret(&alice, s.id),
        Err(KeywardError::NotFound(_))
    ));
    assert!(t.registry.list_visible(&alice).is_empty());
    assert!(t.registry.search(&alice, "old").is_empty());
    assert!(t
        .registry
        .snapshot()
        .revisions
        .iter()
        .any(|r| r.id == rev));
}

#[test]
fn delete_requires_read_access() {
    let t = team();
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    assert!(matches!(
        t.registry.delete_secret(&t.user("carol"), s.id),
        Err(KeywardError::Forbidden(_))
    ));
}

#[test]
fn search_puts_readable_first_and_caps_results() {
    let t = team();
    t.password("alice", "billing-a", AccessPolicy::Request, "x");
    t.password("carol", "billing-b", AccessPolicy::Any, "x");
    t.password("alice", "unrelated", AccessPolicy::Any, "x");
    t.password("alice", "billing-hidden", AccessPolicy::Hidden, "x");

    let hits = t.registry.search(&t.user("dave"), "BILLING");
    let names: Vec<_> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, ["billing-b", "billing-a"]);
    assert!(hits[0].readable);
    assert!(!hits[1].readable);

    let t = team();
    for i in 0..5 {
        t.password("alice", &format!("svc-{i}"), AccessPolicy::Any, "x");
    }
    let bob = t.user("bob");
    let capped = t.registry.with_search_limit(3);
    assert_eq!(capped.search(&bob, "svc").len(), 3);
}

#[test]
fn listings_split_visible_and_readable() {
    let t = team();
    t.password("alice", "a-open", AccessPolicy::Any, "x");
    t.password("alice", "b-request", AccessPolicy::Request, "x");
    t.password("alice", "c-hidden", AccessPolicy::Hidden, "x");

    let dave = t.user("dave");
    let visible: Vec<_> = t
        .registry
        .list_visible(&dave)
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(visible, ["a-open", "b-request"]);
    assert_eq!(t.registry.list_readable(&dave).len(), 1);
    assert_eq!(t.registry.list_visible(&t.user("root")).len(), 3);
}

#[test]
fn payload_must_match_content_type() {
    let t = team();
    let alice = t.user("alice");
    let s = t.password("alice", "db", AccessPolicy::Request, "pw");
    assert_eq!(s.content_type, ContentType::Password);

    let err = t
        .registry
        .edit_secret(
            &alice,
            s.id,
            SecretUpdate {
                name: Some("renamed".into()),
                payload: Some(SecretPayload::file(vec![1, 2, 3])),
                ..SecretUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, KeywardError::InvalidInput(_)));

    // The failed edit changed nothing.
    let after = t.registry.secret(&alice, s.id).unwrap();
    assert_eq!(after.name, "db");
    assert_eq!(t.registry.history(&alice, s.id).unwrap().len(), 1);
}

#[test]
fn rotation_due_lists_secrets_the_leaver_read() {
    let t = team();
    let read = t.password("alice", "read-it", AccessPolicy::Any, "x");
    let _unread = t.password("alice", "never-read", AccessPolicy::Any, "x");
    let unflagged = t
        .registry
        .create_secret(
            &t.user("alice"),
            NewSecret {
                needs_changing_on_leave: false,
                ..NewSecret::new("no-rotate", AccessPolicy::Any, SecretPayload::password("x"))
            },
        )
        .unwrap();

    let bob = t.user("bob");
    t.registry.read_value(&bob, read.id).unwrap();
    t.registry.read_value(&bob, unflagged.id).unwrap();

    let due = t
        .registry
        .rotation_due_on_departure(&t.user("root"), &bob.id)
        .unwrap();
    assert_eq!(due.iter().map(|s| s.id).collect::<Vec<_>>(), [read.id]);

    assert!(matches!(
        t.registry.rotation_due_on_departure(&bob, &bob.id),
        Err(KeywardError::Forbidden(_))
    ));
}

#[test]
fn rotating_the_value_clears_rotation_due() {
    let t = team();
    let alice = t.user("alice");
    let s = t.password("alice", "shared", AccessPolicy::Any, "x");
    let bob = t.user("bob");
    t.registry.read_value(&bob, s.id).unwrap();

    t.registry
        .edit_secret(
            &alice,
            s.id,
            SecretUpdate {
                payload: Some(SecretPayload::password("rotated")),
                ..SecretUpdate::default()
            },
        )
        .unwrap();

    let due = t
        .registry
        .rotation_due_on_departure(&t.user("root"), &bob.id)
        .unwrap();
    assert!(due.is_empty());
}

#[test]
fn unknown_revision_is_not_found() {
    let t = team();
    assert!(matches!(
        t.registry.read_revision_value(&t.user("root"), RevisionId(99)),
        Err(KeywardError::NotFound(_))
    ));
}

#[test]
fn every_state_change_is_audited() {
    let t = team();
    let alice = t.user("alice");
    let s = t.password("alice", "db", AccessPolicy::Request, "s3cr3t-value");
    let before = t.audit.len();

    let request = t
        .registry
        .request_access(&t.user("carol"), s.id, "please")
        .unwrap();
    t.registry.approve_request(&alice, request.id).unwrap();
    t.registry
        .share(&alice, s.id, &BTreeSet::from([GroupId::new("auditors")]), &BTreeSet::new())
        .unwrap();
    t.registry.delete_secret(&alice, s.id).unwrap();

    let events = t.audit.events();
    assert!(events.len() >= before + 4);
    assert!(events.iter().all(|e| !e.message.contains("s3cr3t-value")));
    assert!(events
        .iter()
        .any(|e| e.subject.group == Some(GroupId::new("auditors"))));
}
