//! `keyward delete` — soft-delete a secret.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::{KeywardError, Result};
use crate::vault::SecretId;

/// Execute the `delete` command.
pub fn execute(cli: &Cli, id: u64, force: bool) -> Result<()> {
    let session = Session::open(cli)?;
    let secret = session.registry().secret(&session.user, SecretId(id))?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete secret '{}'?", secret.name))
            .default(false)
            .interact()
            .map_err(|e| KeywardError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    session.registry().delete_secret(&session.user, secret.id)?;
    session.save()?;

    output::success(&format!("Deleted secret '{}'", secret.name));
    Ok(())
}
