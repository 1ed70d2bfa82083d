//! `keyward rotation-due` — secrets to change because someone is leaving.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;
use crate::identity::UserId;

/// Execute the `rotation-due` command.
pub fn execute(cli: &Cli, user: &str) -> Result<()> {
    let session = Session::open(cli)?;
    let due = session
        .registry()
        .rotation_due_on_departure(&session.user, &UserId::new(user.trim()))?;

    if due.is_empty() {
        output::info(&format!("Nothing to rotate for {user}."));
        return Ok(());
    }
    output::warning(&format!("{} secret(s) {user} has read should be changed:", due.len()));
    output::print_secrets_table(&due);
    Ok(())
}
