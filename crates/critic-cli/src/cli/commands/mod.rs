//! Command implementations.

mod batch;
mod helpers;
mod init;
mod reviews;

pub use batch::run_batch;
pub use init::run_init;
pub use reviews::{
    run_rebase_begin, run_rebase_cancel, run_rebase_finish, run_reviews_create, run_reviews_list,
    run_reviews_partitions, run_reviews_progress, run_reviews_show,
};
