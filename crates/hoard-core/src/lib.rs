//! Hoard Core Library
//!
//! This crate provides the domain models, error taxonomy, configuration and
//! content hashing shared by every hoard component.

pub mod clock;
pub mod config;
pub mod error;
pub mod hashing;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, ErrorKind, ErrorMetadata, LogLevel};
pub use hashing::{ContentDigest, ContentHasher};
pub use storage_types::StorageBackend;
