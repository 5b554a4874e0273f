//! PostgreSQL repositories
//!
//! Queries are runtime-checked (`sqlx::query`) so the crate builds without a
//! live database; the schema is embedded from `migrations/`.

pub mod channel;
pub mod dependents;
pub mod file;
pub mod pool;
pub(crate) mod rows;
pub mod transaction;
pub mod upload;

pub use channel::PgChannelRepository;
pub use dependents::PgDependentRecordsRepository;
pub use file::PgFileRepository;
pub use pool::{connect, run_migrations};
pub use upload::PgUploadSessionRepository;
