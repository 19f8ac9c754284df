//! Implementation of `critic batch`.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::Path;

use critic_core::config::{resolve_user, CriticConfig};
use critic_core::core::batch::BatchRequest;
use critic_core::core::CriticServices;

use super::helpers::open_services;
use crate::output::{Formatter, OutputFormat};

/// Read a batch request from `file` (or stdin for `-`) and apply it.
///
/// The request acts as the `--user` / `$CRITIC_USER` user when it names
/// nobody; when it names someone, they must agree.
#[tracing::instrument(skip(config, format))]
pub fn run_batch(
    config: &CriticConfig,
    file: &Path,
    user: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let raw = if file == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read batch request from stdin")?;
        raw
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    let mut request = parse_request(&raw)?;

    let services = open_services(config)?;
    let named = resolve_user(user, |name| std::env::var(name).ok()).ok();
    settle_user(&services, &mut request, named.as_deref())?;

    let outcome = request.apply(&services)?;
    Formatter::new(format).print(&outcome)
}

fn parse_request(raw: &str) -> Result<BatchRequest> {
    serde_json::from_str(raw).context("Invalid batch request")
}

/// Reconcile the request's user with the acting user named on the command line.
fn settle_user(
    services: &CriticServices,
    request: &mut BatchRequest,
    named: Option<&str>,
) -> Result<()> {
    let Some(name) = named else {
        if request.user.is_none() {
            bail!("Acting user required. Use --user <name>, set CRITIC_USER, or name a user in the request.");
        }
        return Ok(());
    };

    match request.user {
        None => request.user = Some(services.ensure_user(name, None)?),
        Some(id) => {
            if services.user_id(name)? != Some(id) {
                bail!("Batch request acts as {id}, but the acting user is '{name}'");
            }
        }
    }
    Ok(())
}
