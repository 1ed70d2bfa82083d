//! `keyward init` — create a new vault and, if none exists yet, a
//! directory with one superuser.

use std::fs;
use std::sync::Arc;

use crate::cli::output;
use crate::cli::{audit_sink, data_dir, project_dir, prompt_new_password, Cli};
use crate::config::Settings;
use crate::errors::{KeywardError, Result};
use crate::identity::{generate_token, Directory, DirectoryUser};
use crate::vault::VaultStore;

/// Execute the `init` command.
pub fn execute(cli: &Cli, admin: &str) -> Result<()> {
    let project = project_dir()?;
    let settings = Settings::load(&project)?;
    let data_dir = data_dir(cli, &settings, &project);
    let vault_path = data_dir.join(Settings::VAULT_FILE);

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
        output::info(&format!("Created data directory: {}", data_dir.display()));
    }

    if vault_path.exists() {
        output::tip("Use `keyward add` to add secrets to the existing vault.");
        return Err(KeywardError::VaultAlreadyExists(vault_path));
    }

    // Bootstrap a directory so there is someone who can act.
    let directory_path = data_dir.join(Directory::FILE_NAME);
    let mut admin_token = None;
    if !directory_path.exists() {
        if admin.trim().is_empty() {
            return Err(KeywardError::InvalidInput("admin name cannot be empty".into()));
        }
        let token = generate_token();
        Directory::new()
            .with_user(DirectoryUser::new(admin.trim(), &token).superuser())
            .save(&directory_path)?;
        admin_token = Some(token);
    }
    let directory = Arc::new(Directory::load(&directory_path)?);

    let password = prompt_new_password()?;
    VaultStore::create(
        &vault_path,
        password.as_bytes(),
        &settings.argon2_params(),
        directory,
        audit_sink(&data_dir)?,
    )?;
    output::success(&format!("Vault created at {}", vault_path.display()));

    if let Some(token) = admin_token {
        output::success(&format!(
            "Created {} with superuser '{}'",
            directory_path.display(),
            admin.trim()
        ));
        output::warning("This access token is shown only once. Store it safely:");
        println!("{token}");
    }

    output::tip("Run `keyward add <NAME>` to add a secret.");
    output::tip("Run `keyward list` to see the secrets you can access.");
    Ok(())
}
