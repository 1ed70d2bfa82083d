//! `keyward audit` — display the audit log.
//!
//! Usage:
//!   keyward audit               # show last 50 entries
//!   keyward audit --last 20     # show last 20
//!   keyward audit --since 7d    # entries from last 7 days
//!
//! Only superusers may read the log.

use chrono::{DateTime, Utc};

use crate::cli::{Cli, Session};
use crate::errors::{KeywardError, Result};

/// Execute the `audit` command.
pub fn execute(cli: &Cli, last: usize, since: Option<&str>) -> Result<()> {
    let since_dt = since.map(parse_duration).transpose()?;

    let session = Session::open(cli)?;
    if !session.user.is_superuser {
        return Err(KeywardError::Forbidden(format!(
            "{} is not a superuser",
            session.user.id
        )));
    }

    show(&session, last, since_dt)
}

#[cfg(feature = "audit-log")]
fn show(session: &Session, last: usize, since: Option<DateTime<Utc>>) -> Result<()> {
    use crate::audit::SqliteAuditLog;
    use crate::cli::output;

    let log = SqliteAuditLog::open(&session.data_dir)?;
    let entries = log.query(last, since)?;
    if entries.is_empty() {
        output::info("No audit entries found.");
        return Ok(());
    }
    print_audit_table(&entries);
    Ok(())
}

#[cfg(not(feature = "audit-log"))]
fn show(_session: &Session, _last: usize, _since: Option<DateTime<Utc>>) -> Result<()> {
    Err(KeywardError::AuditError(
        "this build has no audit log (built without the `audit-log` feature)".into(),
    ))
}

/// Parse a human-friendly duration string like "7d", "24h", "30m".
fn parse_duration(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    let invalid = || {
        KeywardError::CommandFailed(format!(
            "invalid duration '{input}' (use a format like 7d, 24h or 30m)"
        ))
    };

    let (num_str, unit) = input
        .char_indices()
        .last()
        .map(|(i, unit)| (&input[..i], unit))
        .ok_or_else(invalid)?;
    let num: i64 = num_str.parse().map_err(|_| invalid())?;

    let duration = match unit {
        'd' => chrono::Duration::days(num),
        'h' => chrono::Duration::hours(num),
        'm' => chrono::Duration::minutes(num),
        _ => return Err(invalid()),
    };
    Ok(Utc::now() - duration)
}

#[cfg(feature = "audit-log")]
fn print_audit_table(entries: &[crate::audit::AuditEntry]) {
    use comfy_table::{ContentArrangement, Table};
    use console::style;

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Level", "Actor", "Message"]);

    for entry in entries {
        let level = match entry.level.as_str() {
            "warning" => style(&entry.level).yellow().bold().to_string(),
            _ => entry.level.clone(),
        };
        table.add_row(vec![
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            level,
            entry.actor.clone(),
            entry.message.clone(),
        ]);
    }

    println!(
        "{}",
        style(format!("{} audit entries:", entries.len())).bold()
    );
    println!("{table}");
}
