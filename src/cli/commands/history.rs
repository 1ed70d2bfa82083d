//! `keyward history` — list a secret's revisions.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;
use crate::vault::SecretId;

/// Execute the `history` command.
pub fn execute(cli: &Cli, id: u64) -> Result<()> {
    let session = Session::open(cli)?;
    let history = session.registry().history(&session.user, SecretId(id))?;
    output::print_history_table(&history);
    output::tip("Run `keyward reveal <ID> --revision <REV>` to read an older value.");
    Ok(())
}
