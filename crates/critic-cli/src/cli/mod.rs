//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

pub mod commands;

/// Code review on top of git: anchored comments, filters and batches
#[derive(Parser, Debug)]
#[command(name = "critic")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Acting user (default: $CRITIC_USER)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Review database (default: $CRITIC_DB or <repo>/.critic/critic.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Repository root (default: $CRITIC_REPO or the enclosing git repository)
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    /// Notification outbox (default: $CRITIC_OUTBOX or <repo>/.critic/outbox.jsonl)
    #[arg(long, global = true)]
    pub outbox: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the .critic directory and database
    Init,

    /// Manage reviews
    #[command(subcommand)]
    Reviews(ReviewsCommands),

    /// Manage rebases of a review's branch
    #[command(subcommand)]
    Rebase(RebaseCommands),

    /// Apply a batch of review actions from a JSON file
    Batch {
        /// Path to the batch request, or '-' for stdin
        file: PathBuf,
    },
}

// ============================================================================
// Reviews subcommands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ReviewsCommands {
    /// Create a review from the commits in base..head
    Create {
        /// One-line summary
        #[arg(long)]
        summary: String,

        /// Branch under review
        #[arg(long)]
        branch: String,

        /// Upstream revision the branch is based on
        #[arg(long)]
        base: String,

        /// Tip of the branch
        #[arg(long, default_value = "HEAD")]
        head: String,
    },

    /// List reviews
    List,

    /// Show review details, files and comment chains
    Show {
        /// Review id
        review: i64,
    },

    /// Show line totals and whether the review is accepted
    Progress {
        /// Review id
        review: i64,
    },

    /// Show the review's history split at rebases
    Partitions {
        /// Review id
        review: i64,
    },
}

// ============================================================================
// Rebase subcommands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum RebaseCommands {
    /// Record that the branch is about to be rebased
    Begin {
        /// Review id
        review: i64,

        /// New branch name, if it changes
        #[arg(long)]
        branch: Option<String>,
    },

    /// Import the rebased commits and finish the rebase
    Finish {
        /// Rebase id
        rebase: i64,

        /// Upstream revision the branch is now based on
        #[arg(long)]
        base: String,

        /// New tip of the branch
        #[arg(long, default_value = "HEAD")]
        head: String,
    },

    /// Abandon an in-progress rebase
    Cancel {
        /// Rebase id
        rebase: i64,
    },
}
