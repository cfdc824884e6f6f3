//! usagepipe database layer
//!
//! Persistence for uploaded usage files: the [`UsageFileStore`] boundary with a Postgres
//! implementation and an in-memory one, plus pool setup and migrations.

pub mod memory;
pub mod postgres;
pub mod setup;
pub mod store;

pub use memory::MemoryUsageFileStore;
pub use postgres::PgUsageFileStore;
pub use setup::{run_migrations, setup_database};
pub use store::UsageFileStore;
