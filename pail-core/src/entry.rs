//! Cache entries and their on-disk record form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CodecOptions;

/// One stored value plus its expiration metadata.
///
/// Owned exclusively by the bucket that created it until evicted. Created
/// on first write of a key; value and expiration are refreshed in place on
/// overwrite; destroyed when its backing file is deleted (explicit delete,
/// expiration, or corruption).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    value: V,
    expiration: Option<DateTime<Utc>>,
    options: CodecOptions,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, expiration: Option<DateTime<Utc>>, options: CodecOptions) -> Self {
        Self {
            value,
            expiration,
            options,
        }
    }

    /// Rebuild an entry from a decoded on-disk record.
    pub fn from_record(record: StoredEntry<V>, options: CodecOptions) -> Self {
        Self {
            value: record.value,
            expiration: record.expiration,
            options,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Overwrite the value and refresh the expiration in place.
    pub fn replace(&mut self, value: V, expiration: Option<DateTime<Utc>>) {
        self.value = value;
        self.expiration = expiration;
    }

    /// Whether the held value has expired. Entries without an expiration
    /// never expire by age.
    pub fn has_expired(&self) -> bool {
        match self.expiration {
            Some(expiration) => Utc::now() > expiration,
            None => false,
        }
    }

    /// Borrowed record view for encoding, avoiding a value clone.
    pub fn record(&self) -> StoredEntryRef<'_, V> {
        StoredEntryRef {
            expiration: self.expiration,
            value: &self.value,
        }
    }
}

/// The on-disk record: expiration metadata plus the value, encoded per the
/// active codec's own wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry<V> {
    pub expiration: Option<DateTime<Utc>>,
    pub value: V,
}

/// Borrowed form of [`StoredEntry`] used on the encode path.
#[derive(Debug, Serialize)]
pub struct StoredEntryRef<'a, V> {
    pub expiration: Option<DateTime<Utc>>,
    pub value: &'a V,
}
