//! The bucket: a dictionary-like object backed by a file cache.
//!
//! A bucket orchestrates key hashing, on-disk path resolution, the
//! in-memory entry index, and the expiration policy. One file per entry at
//! `{root}/{digest}.{extension}`; whole-file reads and writes only.
//!
//! Per (bucket, logical key) an entry moves between four states: absent,
//! in memory, on disk (file exists, not yet loaded), and expired - the
//! last reached as a side effect of a load attempt that detects
//! expiration, which deletes both the file and the memory entry.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use pail_core::config::{lifetime_from_components, validate_lifetime};
use pail_core::error::{ConfigError, KeyMakerError};
use pail_core::{CacheEntry, CodecKind, CodecOptions, KeyBytes, KeyDigest, KeyMaker};

use crate::error::{CacheError, CacheResult, GetEntryError, LoadError};

/// Result of a [`Bucket::prune_directory`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Number of expired files removed.
    pub files_removed: u64,
    /// Total size of the removed files, in bytes.
    pub bytes_reclaimed: u64,
}

/// Dictionary-like object backed by a file cache.
///
/// `V` is the value type stored by this bucket; keys may be any
/// serializable type and are hashed through the bucket's key maker,
/// qualified by codec name so different codecs never collide on the same
/// logical key.
#[derive(Debug)]
pub struct Bucket<V> {
    pub(crate) path: PathBuf,
    pub(crate) codec: CodecKind,
    pub(crate) options: CodecOptions,
    pub(crate) keymaker: KeyMaker,
    pub(crate) lifetime: Option<Duration>,
    pub(crate) index: HashMap<KeyDigest, CacheEntry<V>>,
}

impl<V> Bucket<V> {
    /// Start building a bucket rooted at `path` (created if absent).
    pub fn builder(path: impl Into<PathBuf>) -> BucketBuilder {
        BucketBuilder::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    /// Change the lifetime applied to subsequent writes.
    ///
    /// Existing entries are not rewritten; they are lazily invalidated on
    /// next access if their stored expiration is inconsistent with the new
    /// lifetime. A zero lifetime means "no lifetime".
    pub fn set_lifetime(&mut self, lifetime: Option<Duration>) -> Result<(), ConfigError> {
        if let Some(lifetime) = lifetime {
            validate_lifetime(lifetime)?;
        }
        self.lifetime = normalize_lifetime(lifetime);
        Ok(())
    }

    /// Absolute path of the file backing `digest`.
    pub(crate) fn path_for_digest(&self, digest: &KeyDigest) -> PathBuf {
        self.path
            .join(format!("{}.{}", digest, self.codec.file_extension()))
    }

    /// Expiration stamped onto entries written now.
    pub(crate) fn next_expiration(&self) -> Option<DateTime<Utc>> {
        self.lifetime.map(|lifetime| Utc::now() + lifetime)
    }

    /// The "lifetime changed" condition: the entry's stored expiration is
    /// later than the expiration the current lifetime would produce (or is
    /// absent while a lifetime is now set), meaning it was saved under a
    /// more permissive prior setting.
    fn lifetime_changed(&self, entry: &CacheEntry<V>) -> bool {
        match self.lifetime {
            Some(lifetime) => match entry.expiration() {
                None => true,
                Some(expiration) => expiration > Utc::now() + lifetime,
            },
            None => false,
        }
    }

    /// Abbreviated key rendering for error messages.
    fn abbreviate(key_bytes: &KeyBytes) -> String {
        let rendered = match key_bytes.to_bytes() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => return "<unrenderable key>".to_string(),
        };
        if rendered.chars().count() > 80 {
            let mut truncated: String = rendered.chars().take(77).collect();
            truncated.push_str("...");
            truncated
        } else {
            rendered
        }
    }
}

impl<V> Bucket<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Look up the value for `key`.
    ///
    /// Uses the memory index when populated, otherwise loads and decodes
    /// the backing file. Expired entries are deleted as a side effect and
    /// reported as [`CacheError::KeyNotFound`], as are missing and
    /// undecodable ones.
    pub fn get<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<V> {
        let (digest, key_bytes) = self.digest_for_key(key)?;
        match self.entry_for_digest(&digest) {
            Ok(entry) => Ok(entry.value().clone()),
            Err(GetEntryError::Invalid(reason)) => {
                debug!(%digest, %reason, "key invalid");
                Err(CacheError::KeyNotFound {
                    key: Self::abbreviate(&key_bytes),
                })
            }
            Err(GetEntryError::Fatal(err)) => Err(err),
        }
    }

    /// Store `value` under `key`.
    ///
    /// An existing in-memory entry is updated in place with a refreshed
    /// expiration; otherwise a new entry is created with the bucket's
    /// codec options. Writes through to disk immediately.
    pub fn set<K: Serialize + ?Sized>(&mut self, key: &K, value: V) -> CacheResult<()> {
        let (digest, _) = self.digest_for_key(key)?;
        self.store_for_digest(&digest, value)
    }

    /// Remove `key` from both disk and memory.
    ///
    /// The key must currently resolve (equivalent to a successful `get`);
    /// otherwise fails with [`CacheError::KeyNotFound`].
    pub fn delete<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<()> {
        let (digest, key_bytes) = self.digest_for_key(key)?;
        match self.entry_for_digest(&digest) {
            Ok(_) => {
                remove_file_if_present(&self.path_for_digest(&digest))?;
                self.index.remove(&digest);
                Ok(())
            }
            Err(GetEntryError::Invalid(_)) => Err(CacheError::KeyNotFound {
                key: Self::abbreviate(&key_bytes),
            }),
            Err(GetEntryError::Fatal(err)) => Err(err),
        }
    }

    /// Whether `key` currently resolves to a valid value.
    pub fn contains<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<bool> {
        let (digest, _) = self.digest_for_key(key)?;
        match self.entry_for_digest(&digest) {
            Ok(_) => Ok(true),
            Err(GetEntryError::Invalid(_)) => Ok(false),
            Err(GetEntryError::Fatal(err)) => Err(err),
        }
    }

    /// Remove `key` from memory only, leaving the file in place.
    ///
    /// Forces the next `get` to re-read from disk. Keys that do not
    /// resolve are a no-op.
    pub fn unload_key<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<()> {
        let (digest, _) = self.digest_for_key(key)?;
        match self.entry_for_digest(&digest) {
            Ok(_) => {
                self.index.remove(&digest);
                Ok(())
            }
            Err(GetEntryError::Invalid(_)) => Ok(()),
            Err(GetEntryError::Fatal(err)) => Err(err),
        }
    }

    /// Scan the root directory for files written by this bucket's codec
    /// and reclaim the expired ones.
    ///
    /// Each candidate goes through a `get`-style load: entries that turn
    /// out expired are deleted and counted; files that fail to decode are
    /// left untouched, since they may belong to an incompatible codec
    /// version. Safe against a directory shared by multiple buckets using
    /// the same codec - only positively identified expirations are
    /// removed.
    pub fn prune_directory(&mut self) -> CacheResult<PruneStats> {
        let extension = self.codec.file_extension();
        let mut candidates = Vec::new();
        for dir_entry in fs::read_dir(&self.path)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(digest) = KeyDigest::parse(stem) else {
                continue;
            };
            candidates.push((digest, dir_entry.metadata()?.len()));
        }

        let mut stats = PruneStats::default();
        for (digest, size) in candidates {
            match self.entry_for_digest(&digest) {
                Ok(_) => {}
                Err(GetEntryError::Invalid(LoadError::Expired)) => {
                    stats.files_removed += 1;
                    stats.bytes_reclaimed += size;
                }
                Err(GetEntryError::Invalid(_)) => {}
                Err(GetEntryError::Fatal(err)) => return Err(err),
            }
        }
        debug!(
            files = stats.files_removed,
            bytes = stats.bytes_reclaimed,
            "prune complete"
        );
        Ok(stats)
    }

    /// Compute the digest for `key`, returning the key bytes alongside for
    /// error rendering.
    pub(crate) fn digest_for_key<K: Serialize + ?Sized>(
        &self,
        key: &K,
    ) -> CacheResult<(KeyDigest, KeyBytes)> {
        let key_bytes = self.keymaker.make_key(key)?;
        let digest = KeyDigest::compute(self.codec.name(), &key_bytes)
            .map_err(KeyMakerError::Io)?;
        debug!(%digest, "computed key digest");
        Ok((digest, key_bytes))
    }

    /// Resolve the entry for `digest`, loading from disk when the memory
    /// index misses.
    ///
    /// After resolution the expiration policy runs: an entry that has
    /// expired, or whose stored expiration is inconsistent with the
    /// current lifetime, is deleted from disk and memory and reported as
    /// invalid.
    pub(crate) fn entry_for_digest(
        &mut self,
        digest: &KeyDigest,
    ) -> Result<&CacheEntry<V>, GetEntryError> {
        let file_path = self.path_for_digest(digest);

        if !self.index.contains_key(digest) {
            debug!(path = %file_path.display(), "attempting load from file");
            let bytes = match fs::read(&file_path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %file_path.display(), "file not found");
                    return Err(LoadError::FileNotFound.into());
                }
                Err(err) => return Err(CacheError::from(err).into()),
            };
            let record = match self.codec.decode::<V>(&bytes, &self.options) {
                Ok(record) => record,
                Err(err) => {
                    debug!(path = %file_path.display(), %err, "codec failed to load file");
                    return Err(LoadError::Decode(err).into());
                }
            };
            self.index.insert(
                digest.clone(),
                CacheEntry::from_record(record, self.options.clone()),
            );
        }

        let (expired, lifetime_changed) = match self.index.get(digest) {
            Some(entry) => (entry.has_expired(), self.lifetime_changed(entry)),
            None => return Err(LoadError::NotInMemory.into()),
        };
        if expired || lifetime_changed {
            if lifetime_changed {
                warn!(
                    %digest,
                    "entry expires after now + current lifetime; it was saved under \
                     previous cache settings, expiring key"
                );
            }
            remove_file_if_present(&file_path).map_err(GetEntryError::Fatal)?;
            self.index.remove(digest);
            return Err(LoadError::Expired.into());
        }

        match self.index.get(digest) {
            Some(entry) => Ok(entry),
            None => Err(LoadError::NotInMemory.into()),
        }
    }

    /// Update-or-insert the entry for `digest` and write it through to
    /// disk.
    pub(crate) fn store_for_digest(&mut self, digest: &KeyDigest, value: V) -> CacheResult<()> {
        self.update_or_insert(digest, value);
        self.persist_digest(digest)
    }

    /// Update-or-insert the entry for `digest` in memory only.
    pub(crate) fn update_or_insert(&mut self, digest: &KeyDigest, value: V) {
        let expiration = self.next_expiration();
        match self.index.get_mut(digest) {
            Some(entry) => entry.replace(value, expiration),
            None => {
                let entry = CacheEntry::new(value, expiration, self.options.clone());
                self.index.insert(digest.clone(), entry);
            }
        }
    }

    /// Encode the entry for `digest` and write its backing file.
    pub(crate) fn persist_digest(&self, digest: &KeyDigest) -> CacheResult<()> {
        if let Some(entry) = self.index.get(digest) {
            let bytes = self.codec.encode(&entry.record(), &self.options)?;
            fs::write(self.path_for_digest(digest), bytes)?;
        }
        Ok(())
    }
}

/// Remove a file, tolerating it already being gone.
fn remove_file_if_present(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn normalize_lifetime(lifetime: Option<Duration>) -> Option<Duration> {
    lifetime.filter(|lifetime| !lifetime.is_zero())
}

/// Builder for [`Bucket`].
///
/// All configuration is validated at [`BucketBuilder::build`], never at
/// first use: codec availability, option names and value types, and the
/// lifetime arguments.
#[derive(Debug)]
pub struct BucketBuilder {
    path: PathBuf,
    codec: CodecKind,
    options: Option<CodecOptions>,
    keymaker: KeyMaker,
    lifetime: Option<Duration>,
    lifetime_components: Option<Vec<(String, i64)>>,
}

impl BucketBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            codec: CodecKind::Bincode,
            options: None,
            keymaker: KeyMaker::default(),
            lifetime: None,
            lifetime_components: None,
        }
    }

    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn codec_options(mut self, options: CodecOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn keymaker(mut self, keymaker: KeyMaker) -> Self {
        self.keymaker = keymaker;
        self
    }

    /// Lifetime as a single duration. Mutually exclusive with
    /// [`BucketBuilder::lifetime_components`].
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Lifetime as named components (`"weeks"`, `"days"`, `"hours"`,
    /// `"minutes"`, `"seconds"`, `"milliseconds"`, `"microseconds"`).
    pub fn lifetime_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        self.lifetime_components = Some(
            components
                .into_iter()
                .map(|(name, amount)| (name.into(), amount))
                .collect(),
        );
        self
    }

    pub fn build<V>(self) -> CacheResult<Bucket<V>> {
        self.codec.ensure_available().map_err(CacheError::from)?;

        let options = match self.options {
            Some(options) => {
                self.codec.validate_options(&options)?;
                options
            }
            None => self.codec.default_options(),
        };

        let lifetime = match (self.lifetime, self.lifetime_components) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::IncompatibleOptions {
                    option_a: "lifetime".to_string(),
                    option_b: "lifetime components".to_string(),
                }
                .into())
            }
            (Some(duration), None) => {
                validate_lifetime(duration)?;
                Some(duration)
            }
            (None, Some(components)) => Some(lifetime_from_components(components)?),
            (None, None) => None,
        };

        fs::create_dir_all(&self.path)?;
        let path = self.path.canonicalize()?;

        Ok(Bucket {
            path,
            codec: self.codec,
            options,
            keymaker: self.keymaker,
            lifetime: normalize_lifetime(lifetime),
            index: HashMap::new(),
        })
    }
}
