//! `keyward requests` — pending requests to review, or your own.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;

/// Execute the `requests` command.
pub fn execute(cli: &Cli, mine: bool) -> Result<()> {
    let session = Session::open(cli)?;
    let requests = if mine {
        session.registry().pending_created_by(&session.user)
    } else {
        session.registry().pending_reviewable_by(&session.user)
    };
    output::print_requests_table(&requests);
    Ok(())
}
