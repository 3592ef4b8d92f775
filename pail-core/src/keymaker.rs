//! Key derivation: canonical key bytes and content digests.
//!
//! A key maker turns an arbitrary serializable key into a deterministic
//! byte sequence; the bucket hashes those bytes (qualified by codec name)
//! into the 128-bit digest used as both the memory-index key and the
//! on-disk filename stem.
//!
//! Two makers are provided: [`DefaultKeyMaker`] renders the whole canonical
//! string in memory, [`StreamingKeyMaker`] writes it through a spooled
//! temporary file so memory stays bounded for very large keys. Both produce
//! byte-identical output for the same key.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::SpooledTempFile;

use crate::error::KeyMakerError;

/// Chunk size used when re-reading key bytes.
const CHUNK_SIZE: usize = 8 * 1024;

/// Bytes the streaming maker keeps in memory before spilling to disk.
const SPOOL_THRESHOLD: usize = 256 * 1024;

/// Key derivation strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaker {
    Default(DefaultKeyMaker),
    Streaming(StreamingKeyMaker),
}

impl Default for KeyMaker {
    fn default() -> Self {
        KeyMaker::Default(DefaultKeyMaker)
    }
}

impl KeyMaker {
    /// Render `key` into its canonical byte form.
    ///
    /// The canonical form is JSON with map keys sorted, so structurally
    /// equal keys produce the same bytes across processes.
    pub fn make_key<K: Serialize + ?Sized>(&self, key: &K) -> Result<KeyBytes, KeyMakerError> {
        match self {
            KeyMaker::Default(maker) => maker.make_key(key),
            KeyMaker::Streaming(maker) => maker.make_key(key),
        }
    }
}

/// Builds the whole canonical string in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultKeyMaker;

impl DefaultKeyMaker {
    pub fn make_key<K: Serialize + ?Sized>(&self, key: &K) -> Result<KeyBytes, KeyMakerError> {
        let bytes = serde_json::to_vec(key)?;
        Ok(KeyBytes::Buffered(bytes))
    }
}

/// Streams the canonical string through a bounded-memory spool.
///
/// Functionally identical to [`DefaultKeyMaker`]; only the memory profile
/// differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingKeyMaker {
    spool_threshold: usize,
}

impl Default for StreamingKeyMaker {
    fn default() -> Self {
        Self {
            spool_threshold: SPOOL_THRESHOLD,
        }
    }
}

impl StreamingKeyMaker {
    pub fn new(spool_threshold: usize) -> Self {
        Self { spool_threshold }
    }

    pub fn make_key<K: Serialize + ?Sized>(&self, key: &K) -> Result<KeyBytes, KeyMakerError> {
        let mut spool = SpooledTempFile::new(self.spool_threshold);
        serde_json::to_writer(&mut spool, key)?;
        spool.flush().map_err(KeyMakerError::Io)?;
        Ok(KeyBytes::Spooled(RefCell::new(spool)))
    }
}

/// A finite, restartable sequence of key byte chunks.
///
/// Every call to [`KeyBytes::for_each_chunk`] restarts from the beginning
/// and yields the same bytes.
pub enum KeyBytes {
    Buffered(Vec<u8>),
    Spooled(RefCell<SpooledTempFile>),
}

impl KeyBytes {
    /// Feed every chunk, from the start, to `f`.
    pub fn for_each_chunk<F: FnMut(&[u8])>(&self, mut f: F) -> io::Result<()> {
        match self {
            KeyBytes::Buffered(bytes) => {
                for chunk in bytes.chunks(CHUNK_SIZE) {
                    f(chunk);
                }
                Ok(())
            }
            KeyBytes::Spooled(cell) => {
                let mut spool = cell.borrow_mut();
                spool.seek(SeekFrom::Start(0))?;
                let mut buf = [0u8; CHUNK_SIZE];
                loop {
                    let n = spool.read(&mut buf)?;
                    if n == 0 {
                        return Ok(());
                    }
                    f(&buf[..n]);
                }
            }
        }
    }

    /// Collect all chunks into one owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.for_each_chunk(|chunk| out.extend_from_slice(chunk))?;
        Ok(out)
    }
}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyBytes::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            KeyBytes::Spooled(_) => f.debug_tuple("Spooled").finish(),
        }
    }
}

/// 128-bit content digest, rendered as 32 lowercase hex characters.
///
/// Computed over `codec_name || key_bytes` so two codecs never share a
/// digest for the same logical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; 16]);

impl KeyDigest {
    /// Digest the codec name followed by the key bytes.
    pub fn compute(codec_name: &str, key: &KeyBytes) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(codec_name.as_bytes());
        key.for_each_chunk(|chunk| hasher.update(chunk))?;
        let full = hasher.finalize();
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&full[..16]);
        Ok(Self(digest))
    }

    /// Parse a 32-character lowercase hex rendering back into a digest.
    pub fn parse(hex_str: &str) -> Option<Self> {
        if hex_str.len() != 32 {
            return None;
        }
        let bytes = hex::decode(hex_str).ok()?;
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&bytes);
        Some(Self(digest))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Key material derived from instance state.
///
/// An ordered capability set, tried in preference order by callers that
/// need to fold an object's state into a cache key:
///
/// 1. [`KeySource::state`] - the object exposes an explicit
///    serialize-for-caching capability.
/// 2. [`KeySource::from_fields`] - the object's declared fields, collected
///    by its `Serialize` implementation (struct composition folds parent
///    fields in).
/// 3. [`KeySource::from_repr`] - the debug rendering, as a last resort.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    State(Value),
    Fields(Value),
    Repr(String),
}

impl KeySource {
    /// Explicit serialize-for-caching state.
    pub fn state(value: impl Into<Value>) -> Self {
        KeySource::State(value.into())
    }

    /// Declared-field enumeration via `Serialize`.
    pub fn from_fields<T: Serialize>(value: &T) -> Result<Self, KeyMakerError> {
        Ok(KeySource::Fields(serde_json::to_value(value)?))
    }

    /// Debug rendering fallback.
    pub fn from_repr<T: fmt::Debug>(value: &T) -> Self {
        KeySource::Repr(format!("{:?}", value))
    }

    /// The raw key material, ready to be folded into a signature.
    pub fn into_value(self) -> Value {
        match self {
            KeySource::State(value) | KeySource::Fields(value) => value,
            KeySource::Repr(repr) => Value::String(repr),
        }
    }
}

/// Types whose instances contribute state to memoized method signatures.
pub trait InstanceKey {
    fn instance_key(&self) -> KeySource;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_default_maker_canonical_json() {
        let key = json!({"b": 1, "a": 2});
        let bytes = KeyMaker::default().make_key(&key).unwrap().to_bytes().unwrap();
        // Map keys come out sorted.
        assert_eq!(bytes, br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn test_streaming_maker_matches_default() {
        let key = json!({"name": "pail", "sizes": [1, 2, 3], "nested": {"z": 0, "a": 1}});
        let default_bytes = KeyMaker::Default(DefaultKeyMaker)
            .make_key(&key)
            .unwrap()
            .to_bytes()
            .unwrap();
        let streaming_bytes = KeyMaker::Streaming(StreamingKeyMaker::default())
            .make_key(&key)
            .unwrap()
            .to_bytes()
            .unwrap();
        assert_eq!(default_bytes, streaming_bytes);
    }

    #[test]
    fn test_streaming_maker_spills_past_threshold() {
        // Tiny threshold forces the spool onto disk; output must not change.
        let big: Vec<u64> = (0..4096).collect();
        let spilled = StreamingKeyMaker::new(16).make_key(&big).unwrap();
        let buffered = DefaultKeyMaker.make_key(&big).unwrap();
        assert_eq!(spilled.to_bytes().unwrap(), buffered.to_bytes().unwrap());
    }

    #[test]
    fn test_key_bytes_restartable() {
        let key = json!([1, 2, 3]);
        for maker in [
            KeyMaker::Default(DefaultKeyMaker),
            KeyMaker::Streaming(StreamingKeyMaker::default()),
        ] {
            let bytes = maker.make_key(&key).unwrap();
            let first = bytes.to_bytes().unwrap();
            let second = bytes.to_bytes().unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_digest_stable_across_calls() {
        let key = json!({"k": [true, null, "s"]});
        let bytes = KeyMaker::default().make_key(&key).unwrap();
        let first = KeyDigest::compute("json", &bytes).unwrap();
        let second = KeyDigest::compute("json", &bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_string().len(), 32);
    }

    #[test]
    fn test_digest_qualified_by_codec_name() {
        let bytes = KeyMaker::default().make_key("key").unwrap();
        let json_digest = KeyDigest::compute("json", &bytes).unwrap();
        let bincode_digest = KeyDigest::compute("bincode", &bytes).unwrap();
        assert_ne!(json_digest, bincode_digest);
    }

    #[test]
    fn test_digest_parse_round_trip() {
        let bytes = KeyMaker::default().make_key(&17u32).unwrap();
        let digest = KeyDigest::compute("json", &bytes).unwrap();
        let parsed = KeyDigest::parse(&digest.to_string()).unwrap();
        assert_eq!(parsed, digest);
    }

    #[test]
    fn test_digest_parse_rejects_bad_input() {
        assert!(KeyDigest::parse("zz").is_none());
        assert!(KeyDigest::parse("not-hex-not-hex-not-hex-not-hex!").is_none());
    }

    #[test]
    fn test_btreemap_keys_sorted() {
        let mut map = BTreeMap::new();
        map.insert("zeta", 1);
        map.insert("alpha", 2);
        let bytes = KeyMaker::default().make_key(&map).unwrap().to_bytes().unwrap();
        assert_eq!(bytes, br#"{"alpha":2,"zeta":1}"#);
    }

    #[derive(Debug, Serialize)]
    struct Probe {
        position: u32,
        label: String,
    }

    #[test]
    fn test_key_source_from_fields() {
        let probe = Probe {
            position: 3,
            label: "p".to_string(),
        };
        let source = KeySource::from_fields(&probe).unwrap();
        assert_eq!(source.into_value(), json!({"position": 3, "label": "p"}));
    }

    #[test]
    fn test_key_source_from_repr() {
        let source = KeySource::from_repr(&(1, 2));
        assert_eq!(source.into_value(), Value::String("(1, 2)".to_string()));
    }

    #[test]
    fn test_key_source_explicit_state() {
        let source = KeySource::state(json!({"counter": 9}));
        assert_eq!(source.into_value(), json!({"counter": 9}));
    }
}
