//! `keyward show` — secret details with the value masked.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;
use crate::vault::SecretId;

/// Execute the `show` command.
pub fn execute(cli: &Cli, id: u64) -> Result<()> {
    let session = Session::open(cli)?;
    let detail = session.registry().secret_detail(&session.user, SecretId(id))?;
    output::print_secret_detail(&detail);
    Ok(())
}
