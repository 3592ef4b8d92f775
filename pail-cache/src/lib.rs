//! PAIL - Disk-Persisted Key/Value Bucket
//!
//! A process-local, disk-persisted cache. Values are addressed by a
//! content hash of an arbitrary serializable key, serialized through a
//! pluggable codec, and optionally expire after a configurable lifetime.
//!
//! # Example
//!
//! ```no_run
//! use chrono::Duration;
//! use pail_cache::{Bucket, CodecKind};
//!
//! # fn main() -> Result<(), pail_cache::CacheError> {
//! let mut bucket: Bucket<String> = Bucket::<String>::builder("/tmp/pail")
//!     .codec(CodecKind::Json)
//!     .lifetime(Duration::minutes(30))
//!     .build()?;
//!
//! bucket.set("report", "contents".to_string())?;
//! assert_eq!(bucket.get("report")?, "contents");
//! # Ok(())
//! # }
//! ```
//!
//! Writes can be deferred and flushed in one pass via
//! [`Bucket::deferred_write`], and functions can be memoized through a
//! bucket with [`Memoized`].

pub mod bucket;
pub mod deferred;
pub mod error;
pub mod memo;

pub use bucket::{Bucket, BucketBuilder, PruneStats};
pub use deferred::DeferredWriteBucket;
pub use error::{CacheError, CacheResult, MemoError};
pub use memo::{CachedCallInfo, CallArgs, Memoized, MemoizedBuilder, ParamSpec};

// Re-export the core types callers need to configure a bucket.
pub use pail_core::{
    CacheEntry, CodecKind, CodecOptions, ConfigError, DecodeError, DefaultKeyMaker, EncodeError,
    InstanceKey, KeyDigest, KeyMaker, KeyMakerError, KeySource, StreamingKeyMaker,
};
