//! Deferred writes: buffer sets in memory, flush them in one pass.
//!
//! A [`DeferredWriteBucket`] is a view over an existing [`Bucket`] that
//! holds the same memory index through a mutable borrow - writes made
//! through either handle are visible to both, and no merge step is needed
//! beyond [`DeferredWriteBucket::sync`] flushing entries to disk.

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::bucket::Bucket;
use crate::error::{CacheError, CacheResult};

/// Alternative write path for a [`Bucket`] that defers file writes until
/// [`DeferredWriteBucket::sync`] is called.
#[derive(Debug)]
pub struct DeferredWriteBucket<'a, V> {
    inner: &'a mut Bucket<V>,
}

impl<'a, V> DeferredWriteBucket<'a, V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Build a deferred view over `bucket`, sharing its memory index.
    pub fn from_bucket(bucket: &'a mut Bucket<V>) -> Self {
        Self { inner: bucket }
    }

    /// Look up the value for `key`. Identical to [`Bucket::get`].
    pub fn get<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<V> {
        self.inner.get(key)
    }

    /// Store `value` under `key` in memory only; the file write happens at
    /// the next [`DeferredWriteBucket::sync`].
    pub fn set<K: Serialize + ?Sized>(&mut self, key: &K, value: V) -> CacheResult<()> {
        let (digest, _) = self.inner.digest_for_key(key)?;
        self.inner.update_or_insert(&digest, value);
        Ok(())
    }

    /// Remove `key` from both disk and memory. Identical to
    /// [`Bucket::delete`].
    pub fn delete<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<()> {
        self.inner.delete(key)
    }

    /// Whether `key` currently resolves to a valid value.
    pub fn contains<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<bool> {
        self.inner.contains(key)
    }

    /// Remove `key` from memory, leaving its file in place.
    ///
    /// Forces a [`DeferredWriteBucket::sync`] first so unwritten state is
    /// not lost.
    pub fn unload_key<K: Serialize + ?Sized>(&mut self, key: &K) -> CacheResult<()> {
        self.sync()?;
        self.inner.unload_key(key)
    }

    /// Commit deferred writes to file.
    ///
    /// Persists every currently non-expired entry in the shared index.
    /// Entries are checked for expiration on read, but checking here too
    /// avoids pointless writes.
    pub fn sync(&mut self) -> CacheResult<()> {
        let digests: Vec<_> = self
            .inner
            .index
            .iter()
            .filter(|(_, entry)| !entry.has_expired())
            .map(|(digest, _)| digest.clone())
            .collect();
        debug!(entries = digests.len(), "syncing deferred writes");
        for digest in digests {
            self.inner.persist_digest(&digest)?;
        }
        Ok(())
    }
}

impl<V> Bucket<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Run `f` against a deferred-write view of this bucket.
    ///
    /// Writes made inside the scope touch only the shared memory index;
    /// on scope exit the view is synced unconditionally, so entries stored
    /// inside the scope are visible on disk and to this bucket afterwards
    /// even when `f` returns an error. The closure's error takes
    /// precedence over a sync failure.
    pub fn deferred_write<R, E, F>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut DeferredWriteBucket<'_, V>) -> Result<R, E>,
        E: From<CacheError>,
    {
        let mut view = DeferredWriteBucket::from_bucket(self);
        let result = f(&mut view);
        let synced = view.sync();
        match (result, synced) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err.into()),
        }
    }
}
