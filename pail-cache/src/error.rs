//! Error types for bucket and memoization operations.

use pail_core::error::{ConfigError, DecodeError, EncodeError, KeyMakerError};
use thiserror::Error;

/// Errors surfaced by bucket operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The requested key has no valid cached value: never stored, deleted,
    /// expired, or its file failed to decode. The only error `get`/`delete`
    /// callers normally branch on.
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// I/O failure other than "file not found" (permissions, disk errors).
    /// Never recovered; propagated unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    KeyMaker(#[from] KeyMakerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for bucket operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Internal reasons a key has no usable value. Recovered into
/// [`CacheError::KeyNotFound`] at the public boundary.
#[derive(Debug, Error)]
pub(crate) enum LoadError {
    #[error("no file exists for this digest")]
    FileNotFound,

    #[error("entry has expired")]
    Expired,

    #[error("digest not present in the memory index")]
    NotInMemory,

    #[error(transparent)]
    Decode(DecodeError),
}

/// Outcome of an internal entry lookup: either the key is invalid (and the
/// caller decides how to surface that) or a real error must propagate.
#[derive(Debug, Error)]
pub(crate) enum GetEntryError {
    #[error(transparent)]
    Invalid(LoadError),

    #[error(transparent)]
    Fatal(CacheError),
}

impl From<LoadError> for GetEntryError {
    fn from(err: LoadError) -> Self {
        GetEntryError::Invalid(err)
    }
}

impl From<CacheError> for GetEntryError {
    fn from(err: CacheError) -> Self {
        GetEntryError::Fatal(err)
    }
}

/// Errors surfaced by memoized calls.
#[derive(Debug, Error)]
pub enum MemoError {
    /// The wrapped call changed arguments (or instance state) that are part
    /// of its own cache key; deterministic caching is unsound for it.
    #[error("modification of input parameters or instance state by function '{function}' cannot be cached")]
    NonCacheableMutation { function: String },

    /// Call arguments could not be mapped onto the declared parameter list.
    #[error("cannot map call arguments onto '{function}': {reason}")]
    SignatureMismatch { function: String, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}
