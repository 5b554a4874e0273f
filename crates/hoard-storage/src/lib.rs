//! Hoard Storage Library
//!
//! Physical byte placement for hoard: the `Storage` trait with local filesystem
//! and S3-compatible backends, the per-session scratch area used for chunk
//! blobs, and the `StorageRouter` that turns channels into backends and files
//! into URLs.
//!
//! # Object key format
//!
//! - originals: `files/{owner_id}/{yyyy}/{mm}/{file_id}.{ext}`
//! - thumbnails: `thumbnails/{owner_id}/{yyyy}/{mm}/{file_id}.png`
//!
//! Keys must not contain `..` or a leading `/`. Key generation lives in the
//! `keys` module so all backends stay consistent.

pub mod access;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod router;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod scratch;
pub mod traits;
pub mod url_cache;

// Re-export commonly used types
pub use access::resolve_access_mode;
pub use factory::create_storage;
pub use hoard_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use router::{PlacedObject, StorageRouter};
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use scratch::ScratchSpace;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};
pub use url_cache::UrlCache;
