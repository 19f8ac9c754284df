//! Implementation of `critic init`.

use anyhow::{Context, Result};
use std::fs;

use critic_core::config::CriticConfig;
use critic_core::core::CoreContext;

use crate::output::{Formatter, OutputFormat};

/// Entries written to `.critic/.gitignore`; the database and outbox are local state.
const GITIGNORE: &str = "critic.db\ncritic.db-*\noutbox.jsonl\n";

#[tracing::instrument(skip(config, format))]
pub fn run_init(config: &CriticConfig, format: OutputFormat) -> Result<()> {
    let critic_dir = config.critic_dir();
    fs::create_dir_all(&critic_dir)
        .with_context(|| format!("Failed to create {}", critic_dir.display()))?;

    let gitignore = critic_dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, GITIGNORE)
            .with_context(|| format!("Failed to write {}", gitignore.display()))?;
    }

    let db = CoreContext::new(config.clone()).open_db()?;
    let output = serde_json::json!({
        "critic_dir": critic_dir.display().to_string(),
        "db": config.db_path.display().to_string(),
        "schema_version": db.schema_version()?,
    });
    Formatter::new(format).print(&output)
}
