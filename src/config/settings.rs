use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::Argon2Params;
use crate::errors::{KeywardError, Result};
use crate::vault::DEFAULT_SEARCH_LIMIT;

/// Project-level configuration, loaded from `.keyward.toml`.
///
/// Every field is optional in the file; anything left out keeps the
/// value from [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory (relative to project root) holding the vault file, the
    /// audit database and the user directory.
    pub data_dir: String,

    /// Argon2 memory cost in KiB (default: 64 MB).
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,

    /// Maximum number of search hits.
    pub search_limit: usize,

    /// `tracing` filter used when `KEYWARD_LOG` is unset.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let kdf = Argon2Params::default();
        Self {
            data_dir: ".keyward".to_string(),
            argon2_memory_kib: kdf.memory_kib,
            argon2_iterations: kdf.iterations,
            argon2_parallelism: kdf.parallelism,
            search_limit: DEFAULT_SEARCH_LIMIT,
            log_filter: "warn".to_string(),
        }
    }
}

impl Settings {
    pub const FILE_NAME: &'static str = ".keyward.toml";

    /// Vault file name inside the data directory.
    pub const VAULT_FILE: &'static str = "vault.kwv";

    /// Read `<project_dir>/.keyward.toml`, falling back to defaults when
    /// the file is absent. Values that parse but make no sense (a zero
    /// search limit, Argon2 costs below the floor) are rejected here
    /// rather than at first use.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(Self::FILE_NAME);
        let settings = match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| KeywardError::ConfigError(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    fn parse(contents: &str) -> std::result::Result<Self, String> {
        let settings: Settings = toml::from_str(contents).map_err(|e| e.to_string())?;
        if settings.search_limit == 0 {
            return Err("search_limit must be at least 1".into());
        }
        settings
            .argon2_params()
            .validate()
            .map_err(|e| e.to_string())?;
        Ok(settings)
    }

    /// Where the vault, directory and audit log live for `project_dir`.
    pub fn data_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.data_dir)
    }

    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(config: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(Settings::FILE_NAME), config).unwrap();
        dir
    }

    #[test]
    fn no_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.search_limit, DEFAULT_SEARCH_LIMIT);
        assert_eq!(settings.log_filter, "warn");
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let dir = project_with("search_limit = 3\nlog_filter = \"keyward=debug\"\n");
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.search_limit, 3);
        assert_eq!(settings.log_filter, "keyward=debug");
        assert_eq!(settings.data_dir, ".keyward");
        assert_eq!(settings.argon2_params(), Argon2Params::default());
    }

    #[test]
    fn kdf_costs_flow_into_params() {
        let dir = project_with(
            "argon2_memory_kib = 8192\nargon2_iterations = 1\nargon2_parallelism = 1\n",
        );
        let params = Settings::load(dir.path()).unwrap().argon2_params();
        assert_eq!(params.memory_kib, 8192);
        assert_eq!(params.iterations, 1);
        assert_eq!(params.parallelism, 1);
    }

    #[test]
    fn rejected_configs_are_config_errors() {
        for bad in [
            "not valid {{toml",
            "search_limit = 0\n",
            "argon2_memory_kib = 1024\n",
            "colour = true\n",
        ] {
            let dir = project_with(bad);
            assert!(
                matches!(Settings::load(dir.path()), Err(KeywardError::ConfigError(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn data_path_is_relative_to_project() {
        let s = Settings {
            data_dir: "secrets".to_string(),
            ..Settings::default()
        };
        assert_eq!(
            s.data_path(Path::new("/srv/app")),
            PathBuf::from("/srv/app/secrets")
        );
    }
}
