//! `keyward search` — find secrets by name, description, URL or username.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::{KeywardError, Result};

/// Execute the `search` command.
pub fn execute(cli: &Cli, term: &str) -> Result<()> {
    if term.trim().is_empty() {
        return Err(KeywardError::InvalidInput("search term cannot be empty".into()));
    }
    let session = Session::open(cli)?;
    let hits = session.registry().search(&session.user, term);
    output::print_search_hits(&hits);
    Ok(())
}
