//! `keyward reveal` — decrypt and print a secret's value.
//!
//! Every reveal is recorded on the revision and in the audit log, so the
//! vault is saved afterwards.

use std::fs;
use std::path::Path;

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::{KeywardError, Result};
use crate::vault::{RevisionId, SecretId, SecretPayload};

/// Execute the `reveal` command.
pub fn execute(cli: &Cli, id: u64, revision: Option<u64>, out: Option<&Path>) -> Result<()> {
    let session = Session::open(cli)?;
    let registry = session.registry();

    let value = match revision {
        Some(rev) => {
            // Make sure the revision belongs to the secret the user named.
            let info = registry.revision(&session.user, RevisionId(rev))?;
            if info.secret != SecretId(id) {
                return Err(KeywardError::NotFound(format!("revision {rev}")));
            }
            registry.read_revision_value(&session.user, RevisionId(rev))?
        }
        None => registry.read_value(&session.user, SecretId(id))?,
    };
    session.save()?;

    match &value.payload {
        SecretPayload::Password(pw) => println!("{}", pw.as_str()),
        SecretPayload::CreditCard(card) => {
            println!("Number:     {}", card.number);
            println!("Holder:     {}", card.holder);
            println!(
                "Expires:    {:02}/{}",
                card.expiration_month, card.expiration_year
            );
            println!("CVC:        {}", card.security_code);
            if !card.password.is_empty() {
                println!("Password:   {}", card.password);
            }
        }
        SecretPayload::File(bytes) => match out {
            Some(path) => {
                fs::write(path, bytes.as_slice())?;
                output::success(&format!("Wrote {} bytes to {}", bytes.len(), path.display()));
            }
            None => {
                use std::io::Write;
                std::io::stdout().write_all(bytes.as_slice())?;
            }
        },
    }
    Ok(())
}
