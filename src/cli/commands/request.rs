//! `keyward request` — ask for read access to a secret.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;
use crate::vault::SecretId;

/// Execute the `request` command.
pub fn execute(cli: &Cli, id: u64, reason: &str) -> Result<()> {
    let session = Session::open(cli)?;
    let request = session
        .registry()
        .request_access(&session.user, SecretId(id), reason)?;
    session.save()?;

    output::success(&format!(
        "Access request {} filed; {} reviewer(s) can approve it",
        request.id,
        request.reviewers.len()
    ));
    Ok(())
}
