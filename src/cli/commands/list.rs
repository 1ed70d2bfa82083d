//! `keyward list` — list the secrets you can see (or read).

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;

/// Execute the `list` command.
pub fn execute(cli: &Cli, readable_only: bool) -> Result<()> {
    let session = Session::open(cli)?;
    let secrets = if readable_only {
        session.registry().list_readable(&session.user)
    } else {
        session.registry().list_visible(&session.user)
    };
    output::print_secrets_table(&secrets);
    Ok(())
}
