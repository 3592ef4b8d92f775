//! PAIL Core - Codecs, Key Derivation, and Entry Types
//!
//! Leaf crate of the PAIL disk cache: the pluggable serialization codecs,
//! the canonical key byte/digest machinery, the cache entry type, and the
//! configuration and error types shared with `pail-cache`.

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod keymaker;

pub use codec::{CodecKind, BINCODE_PROTOCOLS, DEFAULT_BINCODE_PROTOCOL};
pub use config::{
    lifetime_from_components, validate_lifetime, CodecOptions, LIFETIME_COMPONENTS,
};
pub use entry::{CacheEntry, StoredEntry, StoredEntryRef};
pub use error::{ConfigError, DecodeError, EncodeError, KeyMakerError};
pub use keymaker::{
    DefaultKeyMaker, InstanceKey, KeyBytes, KeyDigest, KeyMaker, KeySource, StreamingKeyMaker,
};
