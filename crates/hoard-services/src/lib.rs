//! Hoard Services Layer
//!
//! The resumable upload and content-addressed storage core: upload sessions,
//! merge, ingestion with per-owner deduplication, storage channel
//! administration and retention. [`Hoard`] wires them together over the
//! repository traits from `hoard-db` and the router from `hoard-storage`.

pub mod channels;
pub mod context;
pub mod dedup;
pub mod ingest;
pub mod merge;
pub mod reaper;
pub mod sessions;
pub mod thumbnail;

pub use channels::ChannelRegistry;
pub use context::{Hoard, HoardRepositories, OpenedFile};
pub use dedup::{DeduplicationIndex, DuplicateTarget};
pub use ingest::{IngestPipeline, IngestRequest};
pub use merge::MergeEngine;
pub use reaper::{CascadeOutcome, RetentionReaper, SweepReport};
pub use sessions::UploadSessionManager;
