//! File metadata index.
//!
//! The [`MetadataStore`] trait is the contract the transfer layer depends on;
//! [`InMemoryMetadataStore`] is a process-local implementation guarded by a single
//! readers-writer lock over the whole map.
//!
//! Records cross the store boundary by value only. Every record handed in is cloned on insert and
//! every record handed out is a clone, so callers can never alias the store's internal state.
//!
//! The store knows nothing about blob storage. Keeping records and blobs consistent is the
//! transfer layer's job.

use crate::{MetadataError, MetadataResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Metadata for one stored file.
///
/// A timestamp equal to the Unix epoch (the `Default`) is treated as unset by
/// [`MetadataStore::create`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: String,
    /// Bytes actually persisted for this file.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FileRecord {
    /// A record with unset timestamps, ready for [`MetadataStore::create`].
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
            ..Self::default()
        }
    }
}

fn is_unset(ts: &DateTime<Utc>) -> bool {
    *ts == DateTime::<Utc>::default()
}

/// Atomic create/read/update/delete/list over file metadata.
pub trait MetadataStore: Send + Sync {
    /// Inserts a copy of `record`, filling unset timestamps with the current time.
    ///
    /// Fails with `AlreadyExists` without touching state if the filename is present.
    fn create(&self, record: FileRecord) -> MetadataResult<FileRecord>;

    /// Returns a copy of the record for `filename`.
    fn get(&self, filename: &str) -> MetadataResult<FileRecord>;

    /// Overwrites an existing record. `modified_at` is always set to now and the stored
    /// `created_at` is kept; caller-supplied values for both are ignored.
    fn update(&self, record: FileRecord) -> MetadataResult<FileRecord>;

    /// Removes the record for `filename`.
    fn delete(&self, filename: &str) -> MetadataResult<()>;

    /// Copies of every record whose filename starts with `prefix`. An empty prefix matches all.
    /// No ordering is guaranteed.
    fn list(&self, prefix: &str) -> Vec<FileRecord>;

    /// Presence check without copying the record.
    fn exists(&self, filename: &str) -> bool;
}

/// [`MetadataStore`] backed by a `HashMap` behind a `parking_lot::RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    files: RwLock<HashMap<String, FileRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn create(&self, mut record: FileRecord) -> MetadataResult<FileRecord> {
        let mut files = self.files.write();

        if files.contains_key(&record.filename) {
            return Err(MetadataError::AlreadyExists(record.filename));
        }

        let now = Utc::now();
        if is_unset(&record.created_at) {
            record.created_at = now;
        }
        if is_unset(&record.modified_at) {
            record.modified_at = now;
        }

        files.insert(record.filename.clone(), record.clone());
        Ok(record)
    }

    fn get(&self, filename: &str) -> MetadataResult<FileRecord> {
        self.files
            .read()
            .get(filename)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(filename.to_owned()))
    }

    fn update(&self, mut record: FileRecord) -> MetadataResult<FileRecord> {
        let mut files = self.files.write();

        let Some(stored) = files.get_mut(&record.filename) else {
            return Err(MetadataError::NotFound(record.filename));
        };

        record.created_at = stored.created_at;
        record.modified_at = Utc::now();
        *stored = record.clone();
        Ok(record)
    }

    fn delete(&self, filename: &str) -> MetadataResult<()> {
        self.files
            .write()
            .remove(filename)
            .map(|_| ())
            .ok_or_else(|| MetadataError::NotFound(filename.to_owned()))
    }

    fn list(&self, prefix: &str) -> Vec<FileRecord> {
        self.files
            .read()
            .values()
            .filter(|record| record.filename.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn exists(&self, filename: &str) -> bool {
        self.files.read().contains_key(filename)
    }
}
