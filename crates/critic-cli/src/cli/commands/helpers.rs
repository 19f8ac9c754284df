//! Shared helpers for CLI commands.

use anyhow::{bail, Context, Result};

use critic_core::config::{resolve_user, CriticConfig};
use critic_core::core::{CoreContext, CriticServices};
use critic_core::model::UserId;
use critic_core::scm::git::GitRepo;

/// Ensure `critic init` has been run for this repository.
pub fn ensure_initialized(config: &CriticConfig) -> Result<()> {
    if !config.db_path.exists() {
        bail!(
            "No review database at {}. Run 'critic init' first.",
            config.db_path.display()
        );
    }
    Ok(())
}

/// Open the database, git and the outbox for a command.
pub fn open_services(config: &CriticConfig) -> Result<CriticServices> {
    ensure_initialized(config)?;
    CoreContext::new(config.clone())
        .services()
        .context("Failed to open review database")
}

pub fn git_repo(config: &CriticConfig) -> GitRepo {
    GitRepo::new(config.repo_root.clone())
}

/// The acting user's id, registering the user on first use.
pub fn acting_user(services: &CriticServices, explicit: Option<&str>) -> Result<UserId> {
    let name = resolve_user(explicit, |name| std::env::var(name).ok())?;
    Ok(services.ensure_user(&name, None)?)
}
