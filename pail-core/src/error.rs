//! Error types for PAIL operations

use thiserror::Error;

/// Configuration errors.
///
/// All of these are raised when a bucket (or memoized function) is
/// constructed, never deferred to first use.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown option '{option}' for codec {codec}")]
    UnknownOption { codec: &'static str, option: String },

    #[error("invalid value for option '{option}': {value} - {reason}")]
    InvalidOptionValue {
        option: String,
        value: String,
        reason: String,
    },

    #[error("unknown lifetime component: {component}")]
    UnknownLifetimeComponent { component: String },

    #[error("lifetime cannot be negative")]
    NegativeLifetime,

    #[error("incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("codec {codec} is not available: rebuild with the '{feature}' feature enabled")]
    CodecUnavailable {
        codec: &'static str,
        feature: &'static str,
    },

    #[error("{what} '{name}' missing from declared parameters")]
    UnknownParameter { what: &'static str, name: String },
}

/// Raised when a codec cannot serialize an entry.
#[derive(Debug, Error)]
#[error("codec {codec} failed to encode entry: {reason}")]
pub struct EncodeError {
    pub codec: &'static str,
    pub reason: String,
}

/// Raised when a codec cannot parse a byte stream.
///
/// Covers truncated or malformed input and input produced by an
/// incompatible codec configuration. This is the only error a bucket is
/// permitted to translate into "key invalid"; lower-level I/O errors
/// propagate unchanged.
#[derive(Debug, Error)]
#[error("codec {codec} failed to decode entry: {reason}")]
pub struct DecodeError {
    pub codec: &'static str,
    pub reason: String,
}

/// Key derivation errors.
#[derive(Debug, Error)]
pub enum KeyMakerError {
    /// The key could not be rendered into its canonical form.
    #[error("key cannot be canonicalized: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The spooled key buffer could not be written or re-read.
    #[error("key buffer I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
