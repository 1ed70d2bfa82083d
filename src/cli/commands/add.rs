//! `keyward add` — create a secret with its first value.

use std::path::Path;

use crate::cli::output;
use crate::cli::{id_set, read_payload, Cli, KindArg, MetadataArgs, PolicyArg, Session};
use crate::errors::Result;
use crate::identity::{GroupId, UserId};
use crate::vault::{ContentType, NewSecret};

/// Everything `add` needs beyond the CLI globals.
pub struct AddArgs<'a> {
    pub name: &'a str,
    pub meta: &'a MetadataArgs,
    pub policy: PolicyArg,
    pub kind: KindArg,
    pub value: Option<&'a str>,
    pub file: Option<&'a Path>,
    pub groups: &'a [String],
    pub users: &'a [String],
    pub rotate_on_leave: bool,
}

/// Execute the `add` command.
pub fn execute(cli: &Cli, args: AddArgs<'_>) -> Result<()> {
    let kind = if args.file.is_some() {
        ContentType::File
    } else {
        ContentType::from(args.kind)
    };

    let session = Session::open(cli)?;
    let payload = read_payload(kind, args.value, args.file)?;

    let mut new = NewSecret::new(args.name, args.policy.into(), payload);
    new.description = args.meta.description.clone();
    new.url = args.meta.url.clone();
    new.username = args.meta.username.clone();
    new.filename = args
        .file
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());
    new.needs_changing_on_leave = args.rotate_on_leave;
    new.allowed_groups = id_set(args.groups, GroupId);
    new.allowed_users = id_set(args.users, UserId);

    let secret = session.registry().create_secret(&session.user, new)?;
    session.save()?;

    output::success(&format!("Added secret '{}' (id {})", secret.name, secret.id));
    Ok(())
}
