//! `keyward edit` — change metadata and/or set a new value.

use std::path::Path;

use crate::cli::output;
use crate::cli::{id_set, read_payload, Cli, MetadataArgs, PolicyArg, Session};
use crate::errors::Result;
use crate::identity::{GroupId, UserId};
use crate::vault::{SecretId, SecretUpdate};

pub struct EditArgs<'a> {
    pub id: u64,
    pub name: Option<&'a str>,
    pub meta: &'a MetadataArgs,
    pub policy: Option<PolicyArg>,
    pub new_value: bool,
    pub value: Option<&'a str>,
    pub file: Option<&'a Path>,
    pub rotate_on_leave: Option<bool>,
    /// Replacement ACL; `Some(&[])` clears it.
    pub set_groups: Option<&'a [String]>,
    pub set_users: Option<&'a [String]>,
}

/// Empty strings clear an optional field.
fn clearable(value: Option<&String>) -> Option<Option<String>> {
    value.map(|v| Some(v.trim().to_string()).filter(|v| !v.is_empty()))
}

/// Execute the `edit` command.
pub fn execute(cli: &Cli, args: EditArgs<'_>) -> Result<()> {
    let session = Session::open(cli)?;
    let id = SecretId(args.id);

    let mut update = SecretUpdate {
        name: args.name.map(str::to_string),
        description: clearable(args.meta.description.as_ref()),
        access_policy: args.policy.map(Into::into),
        needs_changing_on_leave: args.rotate_on_leave,
        url: clearable(args.meta.url.as_ref()),
        username: clearable(args.meta.username.as_ref()),
        allowed_groups: args.set_groups.map(|names| id_set(names, GroupId)),
        allowed_users: args.set_users.map(|names| id_set(names, UserId)),
        ..SecretUpdate::default()
    };

    if args.new_value || args.value.is_some() || args.file.is_some() {
        let current = session.registry().secret(&session.user, id)?;
        update.payload = Some(read_payload(current.content_type, args.value, args.file)?);
        if let Some(name) = args.file.and_then(Path::file_name) {
            update.filename = Some(Some(name.to_string_lossy().into_owned()));
        }
    }

    if update.is_empty() {
        output::info("Nothing to change.");
        return Ok(());
    }

    let secret = session.registry().edit_secret(&session.user, id, update)?;
    session.save()?;

    output::success(&format!("Updated secret '{}'", secret.name));
    Ok(())
}
