//! Persistent key-to-record store: one JSON file per key.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::entry::CacheRecord;
use crate::error::CacheError;

/// Disk tier of the cache.
///
/// Keys may contain characters that are illegal in file names, so each
/// record lives at `<dir>/<sha256(key)>.json`. Corrupt or unreadable
/// files are removed and reported as misses; they never fail a lookup.
#[derive(Debug)]
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    /// Open (and create if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let mut name = String::with_capacity(digest.len() * 2 + 5);
        for byte in digest {
            name.push_str(&format!("{byte:02x}"));
        }
        name.push_str(".json");
        self.dir.join(name)
    }

    /// Read a fresh record for `key`. Expired and corrupt records are
    /// removed and reported as a miss.
    pub fn read(&self, key: &str) -> Option<CacheRecord> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(key, path = %path.display(), %error, "unreadable cache record, treating as miss");
                return None;
            }
        };

        let record: CacheRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(error) => {
                warn!(key, path = %path.display(), %error, "corrupt cache record, discarding");
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        if !record.is_fresh() {
            let _ = fs::remove_file(&path);
            return None;
        }

        Some(record)
    }

    pub fn write(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let path = self.path_for(&record.key);
        let bytes = serde_json::to_vec(record).map_err(|source| CacheError::Encode {
            key: record.key.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|source| CacheError::Write { path, source })
    }

    pub fn remove(&self, key: &str) {
        let _ = fs::remove_file(self.path_for(key));
    }

    /// Delete every negative record. Returns the number removed.
    pub fn clear_negative(&self) -> usize {
        self.sweep(|record| record.negative)
    }

    /// Delete every expired record. Returns the number removed.
    pub fn clear_expired(&self) -> usize {
        self.sweep(|record| !record.is_fresh())
    }

    pub fn clear(&self) -> usize {
        self.sweep(|_| true)
    }

    fn sweep(&self, should_remove: impl Fn(&CacheRecord) -> bool) -> usize {
        let mut removed = 0;
        for path in self.record_paths() {
            let drop_it = match fs::read(&path).ok().and_then(|bytes| {
                serde_json::from_slice::<CacheRecord>(&bytes).ok()
            }) {
                Some(record) => should_remove(&record),
                // Unparseable files are garbage either way.
                None => true,
            };
            if drop_it && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn entry_count(&self) -> usize {
        self.record_paths().count()
    }

    fn record_paths(&self) -> impl Iterator<Item = PathBuf> {
        fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
    }
}
