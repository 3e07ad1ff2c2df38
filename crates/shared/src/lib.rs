//! Shared types and database plumbing used by the API server and the
//! billing crate.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::SubscriptionStatus;
