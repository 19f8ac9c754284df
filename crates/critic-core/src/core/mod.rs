//! Service layer for critic-core.
//!
//! [`CriticServices`] owns the review database, the diff source and the
//! notifier. Read and import operations go through [`ReviewService`]; every
//! mutation of comments, filters and assignments goes through a [`Batch`].
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use critic_core::config::{ConfigOverrides, CriticConfig};
//! use critic_core::core::CoreContext;
//! use critic_core::model::{ReviewId, UserId};
//!
//! let config = CriticConfig::from_env(ConfigOverrides::default(), Path::new("/repo"));
//! let services = CoreContext::new(config).services().unwrap();
//!
//! let mut batch = services.batch(ReviewId(1), UserId(1)).unwrap();
//! batch.add_reply(critic_core::model::ChainId(3), "Done").unwrap();
//! let outcome = batch.finish(&Default::default()).unwrap();
//! println!("{:?}", outcome.batch_id);
//! ```

pub mod batch;
pub mod errors;
pub mod reviews;

pub use batch::{Batch, FinishOptions, FinishOutcome};
pub use errors::{CoreError, CoreResult};
pub use reviews::ReviewService;

use crate::config::CriticConfig;
use crate::model::{ReviewId, UserId};
use crate::notify::{Notifier, SpoolNotifier};
use crate::scm::git::GitRepo;
use crate::scm::DiffSource;
use crate::store::{write, ReviewDb};

/// Paths needed to assemble a [`CriticServices`] for a repository.
#[derive(Debug, Clone)]
pub struct CoreContext {
    config: CriticConfig,
}

impl CoreContext {
    #[must_use]
    pub const fn new(config: CriticConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &CriticConfig {
        &self.config
    }

    /// Open the review database and initialize its schema.
    pub fn open_db(&self) -> CoreResult<ReviewDb> {
        let db = ReviewDb::open(&self.config.db_path).map_err(CoreError::Internal)?;
        db.init_schema().map_err(CoreError::Internal)?;
        Ok(db)
    }

    /// Services backed by git in `repo_root` and the spool outbox.
    pub fn services(&self) -> CoreResult<CriticServices> {
        let db = self.open_db()?;
        Ok(CriticServices::new(
            db,
            Box::new(GitRepo::new(self.config.repo_root.clone())),
            Box::new(SpoolNotifier::new(&self.config.outbox_path)),
        ))
    }
}

/// Facade providing all critic service APIs.
pub struct CriticServices {
    db: ReviewDb,
    diffs: Box<dyn DiffSource>,
    notifier: Box<dyn Notifier>,
}

impl CriticServices {
    #[must_use]
    pub fn new(db: ReviewDb, diffs: Box<dyn DiffSource>, notifier: Box<dyn Notifier>) -> Self {
        Self {
            db,
            diffs,
            notifier,
        }
    }

    /// Access review operations.
    #[must_use]
    pub const fn reviews(&self) -> ReviewService<'_> {
        ReviewService::new(&self.db)
    }

    /// Start a batch of changes to `review` on behalf of `user`.
    pub fn batch(&self, review: ReviewId, user: UserId) -> CoreResult<Batch<'_>> {
        Batch::new(self, review, user)
    }

    /// Get or create a user by name.
    pub fn ensure_user(&self, name: &str, email: Option<&str>) -> CoreResult<UserId> {
        write::ensure_user(self.db.conn(), name, email).map_err(CoreError::Internal)
    }

    /// Look up a user by name.
    pub fn user_id(&self, name: &str) -> CoreResult<Option<UserId>> {
        Ok(self
            .db
            .user_by_name(name)
            .map_err(CoreError::Internal)?
            .map(|user| user.id))
    }

    /// Get a reference to the underlying database.
    ///
    /// Useful for advanced queries not covered by the service layer.
    #[must_use]
    pub const fn db(&self) -> &ReviewDb {
        &self.db
    }

    #[must_use]
    pub fn diffs(&self) -> &dyn DiffSource {
        self.diffs.as_ref()
    }

    #[must_use]
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }
}
