//! critic - code review on top of git

mod cli;
mod output;

use anyhow::Result;
use clap::Parser;
use std::env;
use tracing_subscriber::EnvFilter;

use cli::commands::{
    run_batch, run_init, run_rebase_begin, run_rebase_cancel, run_rebase_finish,
    run_reviews_create, run_reviews_list, run_reviews_partitions, run_reviews_progress,
    run_reviews_show,
};
use cli::{Cli, Commands, RebaseCommands, ReviewsCommands};
use critic_core::config::{ConfigOverrides, CriticConfig};
use critic_core::scm::git::detect_git_root;

/// `CRITIC_LOG` takes precedence over `RUST_LOG`; logs go to stderr.
fn init_tracing(json: bool) {
    let filter = env::var("CRITIC_LOG")
        .ok()
        .filter(|value| !value.is_empty())
        .map_or_else(
            || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            EnvFilter::new,
        );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cwd = env::current_dir()?;
    let repo_root = cli.repo.clone().or_else(|| detect_git_root(&cwd));
    let config = CriticConfig::from_env(
        ConfigOverrides {
            db_path: cli.db.clone(),
            repo_root,
            outbox_path: cli.outbox.clone(),
        },
        &cwd,
    );
    tracing::debug!(?config, "resolved configuration");

    let format = cli.format;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Init => run_init(&config, format)?,

        Commands::Reviews(cmd) => match cmd {
            ReviewsCommands::Create {
                summary,
                branch,
                base,
                head,
            } => run_reviews_create(&config, &summary, &branch, &base, &head, user, format)?,
            ReviewsCommands::List => run_reviews_list(&config, format)?,
            ReviewsCommands::Show { review } => run_reviews_show(&config, review, format)?,
            ReviewsCommands::Progress { review } => run_reviews_progress(&config, review, format)?,
            ReviewsCommands::Partitions { review } => {
                run_reviews_partitions(&config, review, format)?;
            }
        },

        Commands::Rebase(cmd) => match cmd {
            RebaseCommands::Begin { review, branch } => {
                run_rebase_begin(&config, review, branch.as_deref(), user, format)?;
            }
            RebaseCommands::Finish { rebase, base, head } => {
                run_rebase_finish(&config, rebase, &base, &head, format)?;
            }
            RebaseCommands::Cancel { rebase } => run_rebase_cancel(&config, rebase, format)?,
        },

        Commands::Batch { file } => run_batch(&config, &file, user, format)?,
    }

    Ok(())
}
