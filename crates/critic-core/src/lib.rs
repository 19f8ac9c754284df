//! critic-core: domain logic for the critic code review system.
//!
//! This crate owns comment anchor propagation, history partitioning, review
//! filters, the batch transaction engine, `SQLite` storage, and the SCM
//! abstraction.
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod filters;
pub mod history;
pub mod model;
pub mod notify;
pub mod propagate;
pub mod scm;
pub mod store;
