mod cache;
mod catalog;
mod engagement;
mod stats;

use std::path::PathBuf;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};

use crate::error::{RecipeError, Result};

pub use cache::{RankView, RankingCacheEntry, RankingCacheStore, RecipeSummary};
pub use catalog::{CatalogStore, NotificationRecord, RecipeRecord, UserRecord};
pub use engagement::{EngagementStore, LikeRecord, ReviewRecord};
pub use stats::{LikeOutcome, RecipeStats, RecipeStatsStore};

const SEP: u8 = 0x1F;

/// Shared rocksdb handle. Every collection lives in one keyspace, split by a
/// short prefix segment; multi-key mutations go through a single WriteBatch
/// so raw records and their derived stats commit as a unit.
pub struct Database {
    db: DBWithThreadMode<MultiThreaded>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, path)
            .map_err(|err| RecipeError::Storage(err.to_string()))?;

        Ok(Self { db })
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|err| RecipeError::Storage(err.to_string()))
    }

    pub(crate) fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.db
            .put(key, value)
            .map_err(|err| RecipeError::Storage(err.to_string()))
    }

    pub(crate) fn delete(&self, key: &[u8]) -> Result<()> {
        self.db
            .delete(key)
            .map_err(|err| RecipeError::Storage(err.to_string()))
    }

    pub(crate) fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|err| RecipeError::Storage(err.to_string()))
    }

    /// Visits every `(key, value)` pair under `prefix` until the callback
    /// returns `false` or the prefix range is exhausted.
    pub(crate) fn scan_prefix<F>(&self, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|err| RecipeError::Storage(err.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(&key, &value)? {
                break;
            }
        }

        Ok(())
    }
}

pub(crate) fn key_with_segments(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    let mut iter = parts.iter();
    if let Some(first) = iter.next() {
        key.extend_from_slice(first.as_bytes());
    }
    for part in iter {
        key.push(SEP);
        key.extend_from_slice(part.as_bytes());
    }
    key
}

/// Prefix that matches exactly the given segments plus a trailing separator,
/// so `["like", "r1"]` never matches keys under `["like", "r10"]`.
pub(crate) fn prefix_with_segments(parts: &[&str]) -> Vec<u8> {
    let mut prefix = key_with_segments(parts);
    prefix.push(SEP);
    prefix
}

/// Returns the segment after `prefix`, up to the next separator.
pub(crate) fn segment_after<'a>(key: &'a [u8], prefix: &[u8]) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    let end = rest.iter().position(|b| *b == SEP).unwrap_or(rest.len());
    std::str::from_utf8(&rest[..end]).ok()
}
