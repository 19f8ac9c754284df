//! Locating the database, repository and outbox, and the acting user.
//!
//! Each setting comes from an explicit value first, then its environment
//! variable, then a default under `<repo>/.critic/`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// Directory holding critic's files inside a repository.
pub const CRITIC_DIR: &str = ".critic";

pub const DB_VAR: &str = "CRITIC_DB";
pub const REPO_VAR: &str = "CRITIC_REPO";
pub const OUTBOX_VAR: &str = "CRITIC_OUTBOX";
pub const USER_VAR: &str = "CRITIC_USER";

/// Values given explicitly, usually from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub repo_root: Option<PathBuf>,
    pub outbox_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticConfig {
    pub repo_root: PathBuf,
    pub db_path: PathBuf,
    pub outbox_path: PathBuf,
}

impl CriticConfig {
    /// Resolve against the process environment. `cwd` is the fallback
    /// repository root.
    #[must_use]
    pub fn from_env(overrides: ConfigOverrides, cwd: &Path) -> Self {
        Self::resolve(overrides, cwd, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup.
    #[must_use]
    pub fn resolve(
        overrides: ConfigOverrides,
        cwd: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let lookup = |name: &str| env(name).filter(|value| !value.is_empty()).map(PathBuf::from);

        let repo_root = overrides
            .repo_root
            .or_else(|| lookup(REPO_VAR))
            .unwrap_or_else(|| cwd.to_path_buf());
        let critic_dir = repo_root.join(CRITIC_DIR);
        let db_path = overrides
            .db_path
            .or_else(|| lookup(DB_VAR))
            .unwrap_or_else(|| critic_dir.join("critic.db"));
        let outbox_path = overrides
            .outbox_path
            .or_else(|| lookup(OUTBOX_VAR))
            .unwrap_or_else(|| critic_dir.join("outbox.jsonl"));

        Self {
            repo_root,
            db_path,
            outbox_path,
        }
    }

    #[must_use]
    pub fn critic_dir(&self) -> PathBuf {
        self.repo_root.join(CRITIC_DIR)
    }
}

/// Determine the acting user's name.
///
/// Resolution order: explicit value (`--user`), then `CRITIC_USER`.
pub fn resolve_user(explicit: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<String> {
    if let Some(name) = explicit.map(str::trim).filter(|name| !name.is_empty()) {
        return Ok(name.to_string());
    }
    if let Some(name) = env(USER_VAR).filter(|name| !name.trim().is_empty()) {
        return Ok(name.trim().to_string());
    }
    bail!("Acting user required. Use --user <name> or set {USER_VAR}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_live_under_repo() {
        let config = CriticConfig::resolve(ConfigOverrides::default(), Path::new("/work"), env_from(&[]));
        assert_eq!(config.repo_root, PathBuf::from("/work"));
        assert_eq!(config.db_path, PathBuf::from("/work/.critic/critic.db"));
        assert_eq!(config.outbox_path, PathBuf::from("/work/.critic/outbox.jsonl"));
    }

    #[test]
    fn test_env_beats_defaults_and_flags_beat_env() {
        let env = env_from(&[(REPO_VAR, "/repo"), (DB_VAR, "/tmp/env.db"), (OUTBOX_VAR, "")]);
        let config = CriticConfig::resolve(
            ConfigOverrides {
                db_path: Some(PathBuf::from("/flag.db")),
                ..ConfigOverrides::default()
            },
            Path::new("/work"),
            env,
        );
        assert_eq!(config.repo_root, PathBuf::from("/repo"));
        assert_eq!(config.db_path, PathBuf::from("/flag.db"));
        // Empty variables are ignored.
        assert_eq!(config.outbox_path, PathBuf::from("/repo/.critic/outbox.jsonl"));
    }

    #[test]
    fn test_resolve_user() {
        assert_eq!(resolve_user(Some("alice"), env_from(&[])).unwrap(), "alice");
        assert_eq!(
            resolve_user(None, env_from(&[(USER_VAR, "bob")])).unwrap(),
            "bob"
        );
        assert!(resolve_user(Some("  "), env_from(&[])).is_err());
    }
}
