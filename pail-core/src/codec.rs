//! Pluggable value codecs.
//!
//! A closed set of serialization strategies behind one dispatch enum. Codec
//! choice is pure strategy selection: buckets call `encode`/`decode` and
//! read the extension and binary flag, nothing more.
//!
//! The MessagePack codec is gated behind the `msgpack` cargo feature
//! (enabled by default). Selecting it in a build without the feature is a
//! construction-time [`ConfigError`], not a decode failure.

use serde::{de::DeserializeOwned, Serialize};

use crate::config::CodecOptions;
use crate::entry::{StoredEntry, StoredEntryRef};
use crate::error::{ConfigError, DecodeError, EncodeError};

/// Protocol versions the bincode codec understands.
pub const BINCODE_PROTOCOLS: std::ops::RangeInclusive<u64> = 1..=2;

/// Protocol written by default.
pub const DEFAULT_BINCODE_PROTOCOL: u64 = 2;

/// Serialization strategy for cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// Compact binary encoding with a versioned protocol header byte.
    Bincode,
    /// Textual JSON; only JSON-representable values.
    Json,
    /// Compact binary MessagePack.
    MessagePack,
}

impl CodecKind {
    /// Stable codec name, mixed into every key digest so two codecs never
    /// collide on the same logical key.
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::Bincode => "bincode",
            CodecKind::Json => "json",
            CodecKind::MessagePack => "msgpack",
        }
    }

    /// Whether the format is binary (as opposed to textual).
    pub fn is_binary(&self) -> bool {
        match self {
            CodecKind::Bincode => true,
            CodecKind::Json => false,
            CodecKind::MessagePack => true,
        }
    }

    /// Canonical file extension for entries written by this codec.
    pub fn file_extension(&self) -> &'static str {
        match self {
            CodecKind::Bincode => "bin",
            CodecKind::Json => "json",
            CodecKind::MessagePack => "msgpack",
        }
    }

    /// Option names this codec accepts.
    pub fn accepted_options(&self) -> &'static [&'static str] {
        match self {
            CodecKind::Bincode => &["protocol"],
            CodecKind::Json => &["pretty"],
            CodecKind::MessagePack => &["named_structs"],
        }
    }

    /// Default options for this codec.
    pub fn default_options(&self) -> CodecOptions {
        match self {
            CodecKind::Bincode => CodecOptions::new().set("protocol", DEFAULT_BINCODE_PROTOCOL),
            CodecKind::Json => CodecOptions::new().set("pretty", false),
            CodecKind::MessagePack => CodecOptions::new().set("named_structs", true),
        }
    }

    /// Whether this codec was compiled into the current build.
    pub fn is_available(&self) -> bool {
        match self {
            CodecKind::Bincode | CodecKind::Json => true,
            CodecKind::MessagePack => cfg!(feature = "msgpack"),
        }
    }

    /// Fail with a [`ConfigError::CodecUnavailable`] when the codec was
    /// compiled out.
    pub fn ensure_available(&self) -> Result<(), ConfigError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ConfigError::CodecUnavailable {
                codec: self.name(),
                feature: "msgpack",
            })
        }
    }

    /// Validate option names and value types against this codec's accepted
    /// set. Called at bucket construction.
    pub fn validate_options(&self, options: &CodecOptions) -> Result<(), ConfigError> {
        self.ensure_available()?;
        let accepted = self.accepted_options();
        for name in options.names() {
            if !accepted.contains(&name) {
                return Err(ConfigError::UnknownOption {
                    codec: self.name(),
                    option: name.to_string(),
                });
            }
        }
        match self {
            CodecKind::Bincode => {
                let protocol = options.u64_option("protocol", DEFAULT_BINCODE_PROTOCOL)?;
                if !BINCODE_PROTOCOLS.contains(&protocol) {
                    return Err(ConfigError::InvalidOptionValue {
                        option: "protocol".to_string(),
                        value: protocol.to_string(),
                        reason: format!(
                            "supported protocols are {}..={}",
                            BINCODE_PROTOCOLS.start(),
                            BINCODE_PROTOCOLS.end()
                        ),
                    });
                }
            }
            CodecKind::Json => {
                options.bool_option("pretty", false)?;
            }
            CodecKind::MessagePack => {
                options.bool_option("named_structs", true)?;
            }
        }
        Ok(())
    }

    /// Encode a record to bytes per this codec's wire format.
    pub fn encode<V: Serialize>(
        &self,
        record: &StoredEntryRef<'_, V>,
        options: &CodecOptions,
    ) -> Result<Vec<u8>, EncodeError> {
        match self {
            CodecKind::Bincode => {
                let protocol = options
                    .u64_option("protocol", DEFAULT_BINCODE_PROTOCOL)
                    .map_err(|e| self.encode_error(e.to_string()))?;
                let mut bytes = vec![protocol as u8];
                let body = bincode::serialize(record)
                    .map_err(|e| self.encode_error(e.to_string()))?;
                bytes.extend_from_slice(&body);
                Ok(bytes)
            }
            CodecKind::Json => {
                let pretty = options
                    .bool_option("pretty", false)
                    .map_err(|e| self.encode_error(e.to_string()))?;
                let result = if pretty {
                    serde_json::to_vec_pretty(record)
                } else {
                    serde_json::to_vec(record)
                };
                result.map_err(|e| self.encode_error(e.to_string()))
            }
            CodecKind::MessagePack => self.encode_msgpack(record, options),
        }
    }

    /// Decode a record from bytes.
    ///
    /// Fails with [`DecodeError`] when the byte stream is truncated,
    /// malformed, or produced by an incompatible configuration (for
    /// bincode, a protocol header that does not match this codec's
    /// configured protocol).
    pub fn decode<V: DeserializeOwned>(
        &self,
        bytes: &[u8],
        options: &CodecOptions,
    ) -> Result<StoredEntry<V>, DecodeError> {
        match self {
            CodecKind::Bincode => {
                let configured = options
                    .u64_option("protocol", DEFAULT_BINCODE_PROTOCOL)
                    .map_err(|e| self.decode_error(e.to_string()))?;
                let header = *bytes
                    .first()
                    .ok_or_else(|| self.decode_error("empty file".to_string()))?
                    as u64;
                if !BINCODE_PROTOCOLS.contains(&header) {
                    return Err(self.decode_error(format!("unknown protocol {}", header)));
                }
                if header != configured {
                    return Err(self.decode_error(format!(
                        "file written with protocol {}, codec configured for {}",
                        header, configured
                    )));
                }
                bincode::deserialize(&bytes[1..]).map_err(|e| self.decode_error(e.to_string()))
            }
            CodecKind::Json => {
                serde_json::from_slice(bytes).map_err(|e| self.decode_error(e.to_string()))
            }
            CodecKind::MessagePack => self.decode_msgpack(bytes),
        }
    }

    #[cfg(feature = "msgpack")]
    fn encode_msgpack<V: Serialize>(
        &self,
        record: &StoredEntryRef<'_, V>,
        options: &CodecOptions,
    ) -> Result<Vec<u8>, EncodeError> {
        let named = options
            .bool_option("named_structs", true)
            .map_err(|e| self.encode_error(e.to_string()))?;
        let result = if named {
            rmp_serde::to_vec_named(record)
        } else {
            rmp_serde::to_vec(record)
        };
        result.map_err(|e| self.encode_error(e.to_string()))
    }

    #[cfg(not(feature = "msgpack"))]
    fn encode_msgpack<V: Serialize>(
        &self,
        _record: &StoredEntryRef<'_, V>,
        _options: &CodecOptions,
    ) -> Result<Vec<u8>, EncodeError> {
        Err(self.encode_error("msgpack feature not enabled".to_string()))
    }

    #[cfg(feature = "msgpack")]
    fn decode_msgpack<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<StoredEntry<V>, DecodeError> {
        rmp_serde::from_slice(bytes).map_err(|e| self.decode_error(e.to_string()))
    }

    #[cfg(not(feature = "msgpack"))]
    fn decode_msgpack<V: DeserializeOwned>(&self, _bytes: &[u8]) -> Result<StoredEntry<V>, DecodeError> {
        Err(self.decode_error("msgpack feature not enabled".to_string()))
    }

    fn encode_error(&self, reason: String) -> EncodeError {
        EncodeError {
            codec: self.name(),
            reason,
        }
    }

    fn decode_error(&self, reason: String) -> DecodeError {
        DecodeError {
            codec: self.name(),
            reason,
        }
    }
}
