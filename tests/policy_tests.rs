//! Property tests for the access policy rules and value round-trips.

mod common;

use std::collections::BTreeSet;

use chrono::Utc;
use proptest::prelude::*;

use keyward::crypto::{AesGcmCipher, Cipher, MasterKey};
use keyward::identity::{GroupId, Identity, UserId};
use keyward::vault::{
    policy, AccessPolicy, ContentType, NewSecret, Secret, SecretId, SecretPayload, SecretStatus,
};

fn access_policy() -> impl Strategy<Value = AccessPolicy> {
    prop_oneof![
        Just(AccessPolicy::Any),
        Just(AccessPolicy::Request),
        Just(AccessPolicy::Hidden),
    ]
}

#[derive(Debug, Clone)]
struct Case {
    policy: AccessPolicy,
    user_on_acl: bool,
    group_on_acl: bool,
    creator: bool,
    superuser: bool,
}

fn case() -> impl Strategy<Value = Case> {
    (access_policy(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(policy, user_on_acl, group_on_acl, creator, superuser)| Case {
            policy,
            user_on_acl,
            group_on_acl,
            creator,
            superuser,
        },
    )
}

fn build(case: &Case) -> (Secret, Identity) {
    let mut user = Identity::new("pat").with_groups(["team"]);
    user.is_superuser = case.superuser;

    let mut allowed_users = BTreeSet::from([UserId::new("owner")]);
    if case.user_on_acl {
        allowed_users.insert(user.id.clone());
    }
    let mut allowed_groups = BTreeSet::from([GroupId::new("other")]);
    if case.group_on_acl {
        allowed_groups.insert(GroupId::new("team"));
    }

    let secret = Secret {
        id: SecretId(1),
        name: "s".into(),
        description: None,
        content_type: ContentType::Password,
        access_policy: case.policy,
        status: SecretStatus::Active,
        needs_changing_on_leave: true,
        created_by: if case.creator { user.id.clone() } else { UserId::new("owner") },
        created: Utc::now(),
        last_changed: None,
        last_read: None,
        url: None,
        username: None,
        filename: None,
        allowed_groups,
        allowed_users,
        current_revision: None,
    };
    (secret, user)
}

proptest! {
    #[test]
    fn any_policy_is_always_visible_and_readable(mut c in case()) {
        c.policy = AccessPolicy::Any;
        let (secret, user) = build(&c);
        prop_assert!(policy::is_visible(&secret, &user));
        prop_assert!(policy::is_readable(&secret, &user));
    }

    #[test]
    fn hidden_is_invisible_to_outsiders(mut c in case()) {
        c.policy = AccessPolicy::Hidden;
        let (secret, user) = build(&c);
        let insider = c.user_on_acl || c.group_on_acl || c.creator || c.superuser;
        prop_assert_eq!(policy::is_visible(&secret, &user), insider);
    }

    #[test]
    fn request_policy_is_visible_but_gated(mut c in case()) {
        c.policy = AccessPolicy::Request;
        let (secret, user) = build(&c);
        prop_assert!(policy::is_visible(&secret, &user));
        prop_assert_eq!(
            policy::is_readable(&secret, &user),
            c.user_on_acl || c.group_on_acl || c.superuser
        );
    }

    #[test]
    fn readable_implies_visible(c in case()) {
        let (secret, user) = build(&c);
        if policy::is_readable(&secret, &user) {
            prop_assert!(policy::is_visible(&secret, &user));
        }
    }

    #[test]
    fn deleted_secrets_never_listed(c in case()) {
        let (mut secret, user) = build(&c);
        secret.status = SecretStatus::Deleted;
        let all = [secret];
        prop_assert!(policy::all_visible_to(&all, &user).is_empty());
        prop_assert!(policy::all_readable_by(&all, &user).is_empty());
    }

    #[test]
    fn cipher_round_trips_any_bytes(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let cipher = AesGcmCipher::new(&MasterKey::new([7u8; 32])).unwrap();
        let sealed = cipher.encrypt(&data).unwrap();
        let opened = cipher.decrypt(&sealed).unwrap();
        prop_assert_eq!(opened.as_slice(), data.as_slice());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_password_reads_back_unchanged(value in "\\PC{0,64}") {
        let t = common::team();
        let alice = t.user("alice");
        let secret = t
            .registry
            .create_secret(
                &alice,
                NewSecret::new("p", AccessPolicy::Request, SecretPayload::password(value.clone())),
            )
            .unwrap();
        let read = t.registry.read_value(&alice, secret.id).unwrap();
        prop_assert_eq!(read.payload, SecretPayload::password(value.clone()));
        prop_assert_eq!(read.length, value.chars().count());
    }
}
