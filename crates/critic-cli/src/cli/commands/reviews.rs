//! Implementation of `critic reviews` and `critic rebase` subcommands.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use critic_core::config::CriticConfig;
use critic_core::history::Partition;
use critic_core::model::{CommentChain, RebaseId, Review, ReviewFile, ReviewId};
use critic_core::store::ReviewProgress;

use super::helpers::{acting_user, git_repo, open_services};
use crate::output::{Formatter, OutputFormat};

#[derive(Debug, Serialize)]
struct ReviewDetail {
    #[serde(flatten)]
    review: Review,
    progress: ReviewProgress,
    files: Vec<ReviewFile>,
    chains: Vec<CommentChain>,
}

/// Create a review and import `base..head` from git.
#[tracing::instrument(skip(config, format))]
pub fn run_reviews_create(
    config: &CriticConfig,
    summary: &str,
    branch: &str,
    base: &str,
    head: &str,
    user: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(config)?;
    let owner = acting_user(&services, user)?;
    let repo = git_repo(config);

    let reviews = services.reviews();
    let review = reviews.create(summary, branch, owner)?;
    let imported_head = reviews.import_from_git(review, &repo, base, head)?;
    if imported_head.is_none() {
        tracing::warn!(%review, base, head, "no commits between base and head");
    }

    Formatter::new(format).print(&reviews.get(review)?)
}

#[tracing::instrument(skip(config, format))]
pub fn run_reviews_list(config: &CriticConfig, format: OutputFormat) -> Result<()> {
    let services = open_services(config)?;
    let reviews = services.reviews().list()?;
    Formatter::new(format).print_list(&reviews, "No reviews", "reviews")
}

#[tracing::instrument(skip(config, format))]
pub fn run_reviews_show(config: &CriticConfig, review: i64, format: OutputFormat) -> Result<()> {
    let services = open_services(config)?;
    let reviews = services.reviews();
    let id = ReviewId(review);

    let detail = ReviewDetail {
        review: reviews.get(id)?,
        progress: reviews.progress(id)?,
        files: reviews.files(id)?,
        chains: reviews.chains(id)?,
    };
    Formatter::new(format).print(&detail)
}

#[tracing::instrument(skip(config, format))]
pub fn run_reviews_progress(config: &CriticConfig, review: i64, format: OutputFormat) -> Result<()> {
    let services = open_services(config)?;
    let progress = services.reviews().progress(ReviewId(review))?;
    Formatter::new(format).print(&progress)
}

#[tracing::instrument(skip(config, format))]
pub fn run_reviews_partitions(
    config: &CriticConfig,
    review: i64,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(config)?;
    let partitions: Vec<Partition> = services.reviews().partitions(ReviewId(review))?;
    Formatter::new(format).print_list(&partitions, "No commits", "partitions")
}

#[tracing::instrument(skip(config, format))]
pub fn run_rebase_begin(
    config: &CriticConfig,
    review: i64,
    branch: Option<&str>,
    user: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(config)?;
    let user = acting_user(&services, user)?;
    let rebase = services
        .reviews()
        .begin_rebase(ReviewId(review), user, branch)?;
    Formatter::new(format).print(&serde_json::json!({ "rebase": rebase, "review": review }))
}

/// Import the rebased commits, then move the review onto them.
#[tracing::instrument(skip(config, format))]
pub fn run_rebase_finish(
    config: &CriticConfig,
    rebase: i64,
    base: &str,
    head: &str,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(config)?;
    let rebase = RebaseId(rebase);
    let record = services
        .db()
        .get_rebase(rebase)?
        .with_context(|| format!("Rebase not found: {rebase}"))?;

    let repo = git_repo(config);
    let Some(new_head) = services
        .reviews()
        .import_from_git(record.review, &repo, base, head)?
    else {
        bail!("No commits between {base} and {head}");
    };
    let base_sha = repo.resolve(base)?;
    let new_upstream = services.db().commit_by_sha(&base_sha)?;

    services
        .reviews()
        .finish_rebase(rebase, new_head, new_upstream)?;
    Formatter::new(format).print(&services.reviews().get(record.review)?)
}

#[tracing::instrument(skip(config, format))]
pub fn run_rebase_cancel(config: &CriticConfig, rebase: i64, format: OutputFormat) -> Result<()> {
    let services = open_services(config)?;
    services.reviews().cancel_rebase(RebaseId(rebase))?;
    Formatter::new(format).print(&serde_json::json!({ "rebase": rebase, "cancelled": true }))
}
