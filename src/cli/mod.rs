//! CLI module: Clap argument parser, session setup, output helpers and
//! command implementations.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use zeroize::Zeroizing;

use crate::audit::{AuditSink, FanoutAuditSink, TracingAuditSink};
use crate::config::Settings;
use crate::errors::{KeywardError, Result};
use crate::identity::{Directory, Identity, IdentityProvider};
use crate::vault::{
    AccessPolicy, CardData, ContentType, SecretPayload, SecretRegistry, VaultStore,
};

/// Minimum vault passphrase length.
const MIN_PASSWORD_LEN: usize = 8;

/// Environment variable holding the vault passphrase for scripted use.
pub const PASSWORD_ENV: &str = "KEYWARD_PASSWORD";

/// Keyward CLI: a shared team vault with access policies and requests.
#[derive(Parser)]
#[command(
    name = "keyward",
    about = "Shared team secret vault with access policies and access requests",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Your access token (as registered in directory.toml)
    #[arg(long, env = "KEYWARD_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Data directory (default: from .keyward.toml, else .keyward)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new vault (and a directory with one superuser if none exists)
    Init {
        /// Name of the initial superuser written to a fresh directory.toml
        #[arg(long, default_value = "admin")]
        admin: String,
    },

    /// Add a secret
    Add {
        /// Secret name
        name: String,
        #[command(flatten)]
        meta: MetadataArgs,
        /// Who may see and read the secret
        #[arg(long, value_enum, default_value = "request")]
        policy: PolicyArg,
        /// Kind of value stored
        #[arg(long, value_enum, default_value = "password")]
        kind: KindArg,
        /// Password value (omit for interactive prompt)
        #[arg(long, conflicts_with = "file")]
        value: Option<String>,
        /// Read the value from this file (implies --kind file)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Group allowed to read (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,
        /// User allowed to read (repeatable)
        #[arg(long = "user")]
        users: Vec<String>,
        /// Do not flag the secret for rotation when a reader leaves
        #[arg(long)]
        no_rotate_on_leave: bool,
    },

    /// Change a secret's metadata or value
    Edit {
        /// Secret id
        id: u64,
        /// New name
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        meta: MetadataArgs,
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Set a new value (prompts for the secret's kind)
        #[arg(long)]
        new_value: bool,
        /// Password value for --new-value (omit for interactive prompt)
        #[arg(long, requires = "new_value", conflicts_with = "file")]
        value: Option<String>,
        /// Read the new value from this file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Flag (true) or unflag (false) rotation on reader departure
        #[arg(long)]
        rotate_on_leave: Option<bool>,
        /// Replace the allowed groups (comma-separated; no value clears them)
        #[arg(long, value_name = "GROUP", num_args = 0.., value_delimiter = ',')]
        set_groups: Option<Vec<String>>,
        /// Replace the allowed users (comma-separated; no value clears them)
        #[arg(long, value_name = "USER", num_args = 0.., value_delimiter = ',')]
        set_users: Option<Vec<String>>,
    },

    /// Show a secret's details (value masked)
    Show {
        /// Secret id
        id: u64,
    },

    /// Print a secret's value
    Reveal {
        /// Secret id
        id: u64,
        /// Read this revision instead of the current one
        #[arg(long)]
        revision: Option<u64>,
        /// Write a file secret to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a secret
    Delete {
        /// Secret id
        id: u64,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Grant groups or users direct read access
    Share {
        /// Secret id
        id: u64,
        #[arg(long = "group")]
        groups: Vec<String>,
        #[arg(long = "user")]
        users: Vec<String>,
    },

    /// List secrets you can see
    List {
        /// Only secrets you can read
        #[arg(long)]
        readable: bool,
    },

    /// Search secrets by name, description, URL or username
    Search {
        term: String,
    },

    /// Show a secret's revision history
    History {
        /// Secret id
        id: u64,
    },

    /// Ask for read access to a secret
    Request {
        /// Secret id
        id: u64,
        /// Why you need access
        #[arg(long)]
        reason: String,
    },

    /// List pending access requests
    Requests {
        /// Show the requests you filed instead of those you can review
        #[arg(long)]
        mine: bool,
    },

    /// Approve an access request
    Approve {
        /// Request id
        request: u64,
    },

    /// Reject an access request
    Reject {
        /// Request id
        request: u64,
        #[arg(long)]
        reason: Option<String>,
    },

    /// List secrets to rotate because a user is leaving (superusers only)
    RotationDue {
        /// The departing user
        user: String,
    },

    /// View the audit log
    Audit {
        /// Number of entries to show (default: 50)
        #[arg(long, default_value = "50")]
        last: usize,
        /// Show entries since a duration ago (e.g. 7d, 24h, 30m)
        #[arg(long)]
        since: Option<String>,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Optional descriptive fields shared by `add` and `edit`.
#[derive(clap::Args, Debug, Default)]
pub struct MetadataArgs {
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    /// Account name the secret belongs to
    #[arg(long)]
    pub username: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Any,
    Request,
    Hidden,
}

impl From<PolicyArg> for AccessPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Any => AccessPolicy::Any,
            PolicyArg::Request => AccessPolicy::Request,
            PolicyArg::Hidden => AccessPolicy::Hidden,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Password,
    Card,
    File,
}

impl From<KindArg> for ContentType {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Password => ContentType::Password,
            KindArg::Card => ContentType::CreditCard,
            KindArg::File => ContentType::File,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// The project directory commands run against.
pub fn project_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

/// Data directory: `--data-dir` wins over the `data_dir` setting.
pub fn data_dir(cli: &Cli, settings: &Settings, project: &Path) -> PathBuf {
    match &cli.data_dir {
        Some(dir) => project.join(dir),
        None => settings.data_path(project),
    }
}

/// The audit sink commands write to: the SQLite log (when compiled in)
/// plus `tracing`.
pub fn audit_sink(data_dir: &Path) -> Result<Arc<dyn AuditSink>> {
    let fanout = FanoutAuditSink::new().with(Arc::new(TracingAuditSink));
    #[cfg(feature = "audit-log")]
    let fanout = fanout.with(Arc::new(crate::audit::SqliteAuditLog::open(data_dir)?));
    #[cfg(not(feature = "audit-log"))]
    let _ = data_dir;
    Ok(Arc::new(fanout))
}

/// Get the vault passphrase: `KEYWARD_PASSWORD` first, then a prompt.
pub fn prompt_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Enter vault password")
        .interact()
        .map_err(|e| KeywardError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new passphrase with confirmation (used by `init`).
pub fn prompt_new_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            if pw.chars().count() < MIN_PASSWORD_LEN {
                return Err(KeywardError::CommandFailed(format!(
                    "password must be at least {MIN_PASSWORD_LEN} characters"
                )));
            }
            return Ok(Zeroizing::new(pw));
        }
    }

    loop {
        let password = dialoguer::Password::new()
            .with_prompt("Choose vault password")
            .with_confirmation(
                "Confirm vault password",
                "Passwords do not match, try again",
            )
            .interact()
            .map_err(|e| KeywardError::CommandFailed(format!("password prompt: {e}")))?;

        if password.chars().count() < MIN_PASSWORD_LEN {
            output::warning(&format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters. Try again."
            ));
            continue;
        }
        return Ok(Zeroizing::new(password));
    }
}

fn caller_token(cli: &Cli) -> Result<Zeroizing<String>> {
    if let Some(token) = cli.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(Zeroizing::new(token.to_string()));
    }
    let token = dialoguer::Password::new()
        .with_prompt("Access token")
        .interact()
        .map_err(|e| KeywardError::CommandFailed(format!("token prompt: {e}")))?;
    Ok(Zeroizing::new(token))
}

/// An opened vault plus the resolved caller.
pub struct Session {
    pub store: VaultStore,
    pub user: Identity,
    pub data_dir: PathBuf,
}

impl Session {
    /// Load settings and the directory, resolve the caller token, and
    /// open the vault.
    pub fn open(cli: &Cli) -> Result<Self> {
        let project = project_dir()?;
        let settings = Settings::load(&project)?;
        let data_dir = data_dir(cli, &settings, &project);

        let vault_path = data_dir.join(Settings::VAULT_FILE);
        if !vault_path.exists() {
            output::tip("Run `keyward init` to create a vault.");
            return Err(KeywardError::VaultNotFound(vault_path));
        }

        let directory = Arc::new(Directory::load(&data_dir.join(Directory::FILE_NAME))?);
        let token = caller_token(cli)?;
        let user = directory.resolve_user(&token)?;
        tracing::debug!(user = %user.id, "caller resolved");

        let password = prompt_password()?;
        // The vault lock is held until the session is dropped, so
        // concurrent commands run one after another on the latest file.
        let store = VaultStore::open_exclusive(
            &vault_path,
            password.as_bytes(),
            directory,
            audit_sink(&data_dir)?,
        )?
        .with_search_limit(settings.search_limit);

        Ok(Self {
            store,
            user,
            data_dir,
        })
    }

    pub fn registry(&self) -> &SecretRegistry {
        self.store.registry()
    }

    /// Persist the session's changes. A failed write is itself audited,
    /// since the registry already logged the changes it lost.
    pub fn save(&self) -> Result<()> {
        self.store.save_as(&self.user.id)
    }
}

/// Build a payload of `kind` from `--value`, `--file` or prompts.
pub fn read_payload(
    kind: ContentType,
    value: Option<&str>,
    file: Option<&Path>,
) -> Result<SecretPayload> {
    if let Some(path) = file {
        if kind != ContentType::File {
            return Err(KeywardError::InvalidInput(format!(
                "--file can only be used for file secrets, not {kind}"
            )));
        }
        return Ok(SecretPayload::file(std::fs::read(path)?));
    }

    match kind {
        ContentType::Password => match value {
            Some(v) => Ok(SecretPayload::password(v)),
            None => {
                let pw = dialoguer::Password::new()
                    .with_prompt("Secret value")
                    .interact()
                    .map_err(|e| KeywardError::CommandFailed(format!("value prompt: {e}")))?;
                Ok(SecretPayload::password(pw))
            }
        },
        ContentType::CreditCard => prompt_card().map(SecretPayload::CreditCard),
        ContentType::File => Err(KeywardError::InvalidInput(
            "file secrets need --file <path>".into(),
        )),
    }
}

fn prompt_card() -> Result<CardData> {
    fn input<T>(prompt: &str) -> Result<T>
    where
        T: Clone + std::str::FromStr + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        dialoguer::Input::<T>::new()
            .with_prompt(prompt)
            .interact_text()
            .map_err(|e| KeywardError::CommandFailed(format!("card prompt: {e}")))
    }

    let number: String = input("Card number")?;
    let holder: String = input("Card holder")?;
    let expiration_month: u8 = input("Expiration month (1-12)")?;
    let expiration_year: u16 = input("Expiration year")?;
    let security_code = dialoguer::Password::new()
        .with_prompt("Security code")
        .interact()
        .map_err(|e| KeywardError::CommandFailed(format!("card prompt: {e}")))?;
    let password = dialoguer::Password::new()
        .with_prompt("Card PIN / password (optional)")
        .allow_empty_password(true)
        .interact()
        .map_err(|e| KeywardError::CommandFailed(format!("card prompt: {e}")))?;

    Ok(CardData {
        number,
        holder,
        expiration_month,
        expiration_year,
        security_code,
        password,
    })
}

/// Parse repeated `--group`/`--user` flags into id sets.
pub fn id_set<T, F>(names: &[String], make: F) -> std::collections::BTreeSet<T>
where
    T: Ord,
    F: Fn(String) -> T,
{
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(|n| make(n.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::GroupId;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn policy_arg_maps_to_access_policy() {
        assert_eq!(AccessPolicy::from(PolicyArg::Hidden), AccessPolicy::Hidden);
        assert_eq!(AccessPolicy::from(PolicyArg::Any), AccessPolicy::Any);
    }

    #[test]
    fn id_set_trims_and_skips_blanks() {
        let groups = id_set(&[" ops ".into(), String::new(), "ops".into()], GroupId);
        assert_eq!(groups.len(), 1);
        assert!(groups.contains(&GroupId::new("ops")));
    }

    #[test]
    fn file_flag_requires_file_kind() {
        let err = read_payload(ContentType::Password, None, Some(Path::new("x"))).unwrap_err();
        assert!(matches!(err, KeywardError::InvalidInput(_)));
    }

    #[test]
    fn password_value_is_taken_verbatim() {
        let payload = read_payload(ContentType::Password, Some("s3cret"), None).unwrap();
        assert_eq!(payload, SecretPayload::password("s3cret"));
    }

    #[test]
    fn edit_acl_flags_replace_or_clear() {
        let cli = Cli::try_parse_from(["keyward", "edit", "3", "--set-users", "alice,bob", "--set-groups"])
            .unwrap();
        let Commands::Edit {
            set_groups,
            set_users,
            ..
        } = cli.command
        else {
            panic!("expected edit");
        };
        assert_eq!(set_users, Some(vec!["alice".to_string(), "bob".to_string()]));
        assert_eq!(set_groups, Some(Vec::new()));

        let cli = Cli::try_parse_from(["keyward", "edit", "3", "--name", "db"]).unwrap();
        let Commands::Edit { set_users, .. } = cli.command else {
            panic!("expected edit");
        };
        assert_eq!(set_users, None);
    }
}
