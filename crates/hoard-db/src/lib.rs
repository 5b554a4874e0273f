//! Hoard persistence layer
//!
//! Repository traits consumed by the services, their PostgreSQL
//! implementations (`db`) and in-memory implementations (`memory`) used by
//! tests and single-process setups.

pub mod db;
pub mod memory;
pub mod traits;

pub use db::{
    connect, run_migrations, PgChannelRepository, PgDependentRecordsRepository,
    PgFileRepository, PgUploadSessionRepository,
};
pub use memory::{
    MemoryChannelRepository, MemoryDependentRecordsRepository, MemoryFileRepository,
    MemoryUploadSessionRepository,
};
pub use traits::{
    ChannelRepository, DependentKind, DependentRecordsRepository, FileRepository,
    UploadSessionRepository,
};
