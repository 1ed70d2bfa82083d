//! `keyward share` — grant groups or users direct read access.

use crate::cli::output;
use crate::cli::{id_set, Cli, Session};
use crate::errors::{KeywardError, Result};
use crate::identity::{GroupId, UserId};
use crate::vault::SecretId;

/// Execute the `share` command.
pub fn execute(cli: &Cli, id: u64, groups: &[String], users: &[String]) -> Result<()> {
    let groups = id_set(groups, GroupId);
    let users = id_set(users, UserId);
    if groups.is_empty() && users.is_empty() {
        return Err(KeywardError::InvalidInput(
            "pass at least one --group or --user".into(),
        ));
    }

    let session = Session::open(cli)?;
    let secret = session
        .registry()
        .share(&session.user, SecretId(id), &groups, &users)?;
    session.save()?;

    output::success(&format!(
        "'{}' is now shared with {} group(s) and {} user(s)",
        secret.name,
        secret.allowed_groups.len(),
        secret.allowed_users.len()
    ));
    Ok(())
}
