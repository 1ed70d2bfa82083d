//! Access policy evaluation.
//!
//! Everything here is a pure function of a secret, a resolved caller and
//! (for reviewer computation) a directory snapshot. Group membership is
//! checked one level deep: user in group, group on the ACL.

use std::collections::BTreeSet;

use super::secret::{AccessPolicy, Secret};
use crate::identity::{Identity, IdentityProvider, UserId};

/// `true` if `user` is on the secret's ACL directly or through one of
/// their groups.
pub fn is_on_acl(secret: &Secret, user: &Identity) -> bool {
    secret.allowed_users.contains(&user.id) || user.in_any_group(&secret.allowed_groups)
}

/// Whether `user` may know the secret exists.
pub fn is_visible(secret: &Secret, user: &Identity) -> bool {
    match secret.access_policy {
        AccessPolicy::Any | AccessPolicy::Request => true,
        AccessPolicy::Hidden => {
            user.is_superuser || secret.created_by == user.id || is_on_acl(secret, user)
        }
    }
}

/// Whether `user` may read the secret's value.
pub fn is_readable(secret: &Secret, user: &Identity) -> bool {
    secret.access_policy == AccessPolicy::Any || user.is_superuser || is_on_acl(secret, user)
}

/// `true` when `user` can read the secret only because of the superuser
/// flag. Such reads are audited at warning level.
pub fn reads_by_override(secret: &Secret, user: &Identity) -> bool {
    user.is_superuser && secret.access_policy != AccessPolicy::Any && !is_on_acl(secret, user)
}

/// Users who may approve or reject a request for `secret`.
///
/// ACL users plus members of ACL groups, minus the requester. Falls back
/// to every superuser (still minus the requester) when that leaves nobody.
pub fn eligible_reviewers(
    secret: &Secret,
    requester: Option<&UserId>,
    directory: &dyn IdentityProvider,
) -> BTreeSet<UserId> {
    let mut reviewers: BTreeSet<UserId> = secret
        .allowed_users
        .iter()
        .filter(|u| directory.identity(u).is_some())
        .cloned()
        .collect();
    for group in &secret.allowed_groups {
        reviewers.extend(directory.group_members(group));
    }
    if let Some(requester) = requester {
        reviewers.remove(requester);
    }

    if reviewers.is_empty() {
        reviewers = directory.superusers();
        if let Some(requester) = requester {
            reviewers.remove(requester);
        }
    }
    reviewers
}

/// Active secrets `user` may see.
pub fn all_visible_to<'a, I>(secrets: I, user: &Identity) -> Vec<&'a Secret>
where
    I: IntoIterator<Item = &'a Secret>,
{
    secrets
        .into_iter()
        .filter(|s| s.is_active() && is_visible(s, user))
        .collect()
}

/// Active secrets `user` may read.
pub fn all_readable_by<'a, I>(secrets: I, user: &Identity) -> Vec<&'a Secret>
where
    I: IntoIterator<Item = &'a Secret>,
{
    secrets
        .into_iter()
        .filter(|s| s.is_active() && is_readable(s, user))
        .collect()
}
