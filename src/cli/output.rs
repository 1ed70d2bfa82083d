//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use chrono::{DateTime, Utc};
use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::vault::{AccessRequest, RevisionInfo, SearchHit, Secret, SecretDetail};

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn optional_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".to_string(), timestamp)
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

/// Print a table of secrets (Id, Name, Type, Policy, Changed).
pub fn print_secrets_table(secrets: &[Secret]) {
    if secrets.is_empty() {
        info("No secrets to show.");
        tip("Run `keyward add <NAME>` to add a secret.");
        return;
    }

    let mut table = new_table(vec!["Id", "Name", "Type", "Policy", "Changed"]);
    for s in secrets {
        table.add_row(vec![
            s.id.to_string(),
            s.name.clone(),
            s.content_type.to_string(),
            s.access_policy.to_string(),
            optional_timestamp(s.last_changed),
        ]);
    }
    println!("{table}");
}

pub fn print_search_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        info("No matching secrets.");
        return;
    }

    let mut table = new_table(vec!["Id", "Name", "Access"]);
    for hit in hits {
        let access = if hit.readable {
            style("readable").green().to_string()
        } else {
            style("request").yellow().to_string()
        };
        table.add_row(vec![hit.id.to_string(), hit.name.clone(), access]);
    }
    println!("{table}");
}

pub fn print_secret_detail(detail: &SecretDetail) {
    let s = &detail.secret;
    let mut table = new_table(vec!["Field", "Value"]);
    let mut row = |field: &str, value: String| {
        table.add_row(vec![field.to_string(), value]);
    };

    row("Id", s.id.to_string());
    row("Name", s.name.clone());
    row("Type", s.content_type.to_string());
    row("Policy", s.access_policy.to_string());
    if let Some(description) = &s.description {
        row("Description", description.clone());
    }
    if let Some(url) = &s.url {
        row("URL", url.clone());
    }
    if let Some(username) = &s.username {
        row("Username", username.clone());
    }
    if let Some(filename) = &s.filename {
        row("Filename", filename.clone());
    }
    row("Created", format!("{} by {}", timestamp(s.created), s.created_by));
    row("Changed", optional_timestamp(s.last_changed));
    row("Last read", optional_timestamp(s.last_read));
    row(
        "Rotate on leave",
        if s.needs_changing_on_leave { "yes" } else { "no" }.to_string(),
    );
    if detail.readable {
        row("Value", detail.placeholder.clone().unwrap_or_default());
    }
    println!("{table}");

    if !detail.readable {
        match &detail.pending_request {
            Some(request) => info(&format!(
                "Your access request {} is waiting for review.",
                request.id
            )),
            None => tip(&format!(
                "Run `keyward request {} --reason <WHY>` to ask for access.",
                s.id
            )),
        }
    }
}

pub fn print_history_table(history: &[RevisionInfo]) {
    let mut table = new_table(vec!["Revision", "Created", "Set by", "Length", "Current"]);
    for rev in history {
        table.add_row(vec![
            rev.id.to_string(),
            timestamp(rev.created),
            rev.set_by.to_string(),
            rev.length.to_string(),
            if rev.is_current { "*" } else { "" }.to_string(),
        ]);
    }
    println!("{table}");
}

pub fn print_requests_table(requests: &[AccessRequest]) {
    if requests.is_empty() {
        info("No pending access requests.");
        return;
    }

    let mut table = new_table(vec!["Request", "Secret", "Requester", "Created", "Reason"]);
    for r in requests {
        table.add_row(vec![
            r.id.to_string(),
            r.secret.to_string(),
            r.requester.to_string(),
            timestamp(r.created),
            r.reason_request.clone(),
        ]);
    }
    println!("{table}");
}
