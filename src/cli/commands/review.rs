//! `keyward approve` / `keyward reject` — resolve an access request.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;
use crate::vault::RequestId;

/// Execute the `approve` command.
pub fn approve(cli: &Cli, request: u64) -> Result<()> {
    let session = Session::open(cli)?;
    let request = session
        .registry()
        .approve_request(&session.user, RequestId(request))?;
    session.save()?;

    output::success(&format!(
        "Approved request {}: {} can now read secret {}",
        request.id, request.requester, request.secret
    ));
    Ok(())
}

/// Execute the `reject` command.
pub fn reject(cli: &Cli, request: u64, reason: Option<&str>) -> Result<()> {
    let session = Session::open(cli)?;
    let request = session
        .registry()
        .reject_request(&session.user, RequestId(request), reason)?;
    session.save()?;

    output::success(&format!("Rejected request {}", request.id));
    Ok(())
}
