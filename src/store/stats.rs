use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::WriteBatch;
use serde::{Deserialize, Serialize};

use super::{
    Database,
    engagement::{
        EngagementStore, LikeRecord, ReviewRecord, batch_delete_like, batch_delete_review,
        batch_put_like, batch_put_review,
    },
    key_with_segments, prefix_with_segments,
};
use crate::{
    error::{RecipeError, Result},
    ranking::round2,
};

const PREFIX_STATS: &str = "stats";

/// Tolerance used when comparing a stored average against a fresh
/// recomputation; matches the 2-decimal storage precision.
pub const DRIFT_TOLERANCE: f64 = 1e-2;

/// Denormalized per-recipe aggregate of like and review activity. The
/// counts and average must always equal what a full rescan of the raw
/// records would produce; `recalculate` restores that from scratch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeStats {
    pub recipe_id: String,
    pub review_count: u64,
    /// Arithmetic mean of current review ratings, stored at 2-decimal
    /// precision. Meaningful only while `review_count > 0`.
    pub average_rating: f64,
    pub like_count: u64,
}

impl RecipeStats {
    fn empty(recipe_id: &str) -> Self {
        Self {
            recipe_id: recipe_id.to_string(),
            review_count: 0,
            average_rating: 0.0,
            like_count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.review_count == 0 && self.like_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeOutcome {
    Liked,
    Unliked,
}

/// Owns all RecipeStats mutation. Each raw like/review change and its stats
/// delta commit through one WriteBatch, and all mutations for a given
/// recipe serialize on that recipe's lock; different recipes proceed in
/// parallel.
pub struct RecipeStatsStore {
    db: Arc<Database>,
    engagement: Arc<EngagementStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RecipeStatsStore {
    pub fn new(db: Arc<Database>, engagement: Arc<EngagementStore>) -> Self {
        Self {
            db,
            engagement,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn recipe_lock(&self, recipe_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock();
        Arc::clone(
            table
                .entry(recipe_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drops a recipe's lock-table entry once no caller holds a handle to
    /// it. Callers racing for the same recipe keep a clone of the Arc, so
    /// the strong-count check makes eviction safe: an entry is only removed
    /// when recreating it on demand cannot split waiters across two locks.
    fn evict_recipe_lock(&self, recipe_id: &str) {
        let mut table = self.locks.lock();
        if table
            .get(recipe_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            table.remove(recipe_id);
        }
    }

    pub fn get(&self, recipe_id: &str) -> Result<Option<RecipeStats>> {
        match self.db.get(&stats_key(recipe_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn all(&self) -> Result<Vec<RecipeStats>> {
        let prefix = prefix_with_segments(&[PREFIX_STATS]);
        let mut rows = Vec::new();
        self.db.scan_prefix(&prefix, |_, value| {
            rows.push(serde_json::from_slice(value)?);
            Ok(true)
        })?;
        Ok(rows)
    }

    /// Idempotent toggle: no like record for the pair creates one, an
    /// existing record is removed again.
    pub fn apply_like(
        &self,
        user_id: &str,
        recipe_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LikeOutcome> {
        let lock = self.recipe_lock(recipe_id);
        let _guard = lock.lock();

        let mut stats = self
            .get(recipe_id)?
            .unwrap_or_else(|| RecipeStats::empty(recipe_id));
        let mut batch = WriteBatch::default();

        let outcome = if self.engagement.get_like(recipe_id, user_id)?.is_some() {
            batch_delete_like(&mut batch, recipe_id, user_id);
            stats.like_count = stats.like_count.saturating_sub(1);
            LikeOutcome::Unliked
        } else {
            batch_put_like(
                &mut batch,
                &LikeRecord {
                    user_id: user_id.to_string(),
                    recipe_id: recipe_id.to_string(),
                    created_at: now,
                },
            )?;
            stats.like_count += 1;
            LikeOutcome::Liked
        };

        self.write_stats(&mut batch, &stats)?;
        self.db.write(batch)?;
        Ok(outcome)
    }

    /// Explicit unlike. Unlike a recipe the user never liked is a conflict,
    /// not a silent decrement.
    pub fn apply_unlike(&self, user_id: &str, recipe_id: &str) -> Result<()> {
        let lock = self.recipe_lock(recipe_id);
        let _guard = lock.lock();

        if self.engagement.get_like(recipe_id, user_id)?.is_none() {
            return Err(RecipeError::NotLiked);
        }

        let mut stats = self
            .get(recipe_id)?
            .unwrap_or_else(|| RecipeStats::empty(recipe_id));
        let mut batch = WriteBatch::default();
        batch_delete_like(&mut batch, recipe_id, user_id);
        stats.like_count = stats.like_count.saturating_sub(1);
        self.write_stats(&mut batch, &stats)?;
        self.db.write(batch)
    }

    pub fn apply_review(&self, review: ReviewRecord) -> Result<()> {
        let lock = self.recipe_lock(&review.recipe_id);
        let _guard = lock.lock();

        if self
            .engagement
            .get_review(&review.recipe_id, &review.user_id)?
            .is_some()
        {
            return Err(RecipeError::DuplicateReview);
        }

        let mut stats = self
            .get(&review.recipe_id)?
            .unwrap_or_else(|| RecipeStats::empty(&review.recipe_id));

        let rating = f64::from(review.rating);
        stats.average_rating = if stats.review_count == 0 {
            round2(rating)
        } else {
            let count = stats.review_count as f64;
            round2((stats.average_rating * count + rating) / (count + 1.0))
        };
        stats.review_count += 1;

        let mut batch = WriteBatch::default();
        batch_put_review(&mut batch, &review)?;
        self.write_stats(&mut batch, &stats)?;
        self.db.write(batch)
    }

    pub fn edit_review(
        &self,
        user_id: &str,
        recipe_id: &str,
        new_rating: Option<u8>,
        new_comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let lock = self.recipe_lock(recipe_id);
        let _guard = lock.lock();

        let mut review = self
            .engagement
            .get_review(recipe_id, user_id)?
            .ok_or(RecipeError::ReviewNotFound)?;

        let mut stats = match self.get(recipe_id)? {
            Some(stats) => stats,
            // Missing row means earlier drift; rebuild it from raw records
            // before applying the edit on top.
            None => self.recompute(recipe_id)?,
        };

        if let Some(rating) = new_rating {
            if rating != review.rating && stats.review_count > 0 {
                let count = stats.review_count as f64;
                stats.average_rating = round2(
                    (stats.average_rating * count - f64::from(review.rating)
                        + f64::from(rating))
                        / count,
                );
            }
            review.rating = rating;
        }
        if let Some(comment) = new_comment {
            review.comment = comment;
        }
        review.created_at = now;

        let mut batch = WriteBatch::default();
        batch_put_review(&mut batch, &review)?;
        self.write_stats(&mut batch, &stats)?;
        self.db.write(batch)
    }

    pub fn delete_review(&self, user_id: &str, recipe_id: &str) -> Result<()> {
        let lock = self.recipe_lock(recipe_id);
        let _guard = lock.lock();

        let review = self
            .engagement
            .get_review(recipe_id, user_id)?
            .ok_or(RecipeError::ReviewNotFound)?;

        let mut stats = match self.get(recipe_id)? {
            Some(stats) => stats,
            None => self.recompute(recipe_id)?,
        };

        let remaining = stats.review_count.saturating_sub(1);
        stats.average_rating = if remaining == 0 {
            // Never leave a stale average behind the last review.
            0.0
        } else {
            let count = stats.review_count as f64;
            round2((stats.average_rating * count - f64::from(review.rating)) / (count - 1.0))
        };
        stats.review_count = remaining;

        let mut batch = WriteBatch::default();
        batch_delete_review(&mut batch, recipe_id, user_id);
        self.write_stats(&mut batch, &stats)?;
        self.db.write(batch)
    }

    /// Full recompute from the raw like/review records. This is the
    /// reconciliation path after cascading deletions and the remedy for any
    /// detected drift; chained decrements alone are never trusted there.
    pub fn recalculate(&self, recipe_id: &str) -> Result<Option<RecipeStats>> {
        let lock = self.recipe_lock(recipe_id);
        let guard = lock.lock();

        let stats = self.recompute(recipe_id)?;
        if stats.is_empty() {
            self.db.delete(&stats_key(recipe_id))?;
            drop(guard);
            drop(lock);
            self.evict_recipe_lock(recipe_id);
            return Ok(None);
        }
        self.db
            .put(stats_key(recipe_id), serde_json::to_vec(&stats)?)?;
        Ok(Some(stats))
    }

    /// Compares the stored row against a fresh recomputation. Returns the
    /// recomputed value when the stored one has drifted, `None` when
    /// everything matches.
    pub fn detect_drift(&self, recipe_id: &str) -> Result<Option<RecipeStats>> {
        let lock = self.recipe_lock(recipe_id);
        let _guard = lock.lock();

        let fresh = self.recompute(recipe_id)?;
        let stored = self
            .get(recipe_id)?
            .unwrap_or_else(|| RecipeStats::empty(recipe_id));

        let consistent = stored.review_count == fresh.review_count
            && stored.like_count == fresh.like_count
            && (stored.average_rating - fresh.average_rating).abs() <= DRIFT_TOLERANCE;

        if consistent { Ok(None) } else { Ok(Some(fresh)) }
    }

    pub fn delete(&self, recipe_id: &str) -> Result<()> {
        let lock = self.recipe_lock(recipe_id);
        let guard = lock.lock();
        self.db.delete(&stats_key(recipe_id))?;
        drop(guard);
        drop(lock);
        self.evict_recipe_lock(recipe_id);
        Ok(())
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().len()
    }

    fn recompute(&self, recipe_id: &str) -> Result<RecipeStats> {
        let reviews = self.engagement.reviews_for_recipe(recipe_id)?;
        let likes = self.engagement.likes_for_recipe(recipe_id)?;

        let review_count = reviews.len() as u64;
        let average_rating = if reviews.is_empty() {
            0.0
        } else {
            let total: f64 = reviews.iter().map(|r| f64::from(r.rating)).sum();
            round2(total / reviews.len() as f64)
        };

        Ok(RecipeStats {
            recipe_id: recipe_id.to_string(),
            review_count,
            average_rating,
            like_count: likes.len() as u64,
        })
    }

    fn write_stats(&self, batch: &mut WriteBatch, stats: &RecipeStats) -> Result<()> {
        if stats.is_empty() {
            batch.delete(stats_key(&stats.recipe_id));
        } else {
            batch.put(stats_key(&stats.recipe_id), serde_json::to_vec(stats)?);
        }
        Ok(())
    }
}

fn stats_key(recipe_id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_STATS, recipe_id])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, RecipeStatsStore) {
        let temp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(temp.path().join("db")).unwrap());
        let engagement = Arc::new(EngagementStore::new(Arc::clone(&db)));
        (temp, RecipeStatsStore::new(db, engagement))
    }

    fn review(user: &str, recipe: &str, rating: u8) -> ReviewRecord {
        ReviewRecord {
            user_id: user.into(),
            recipe_id: recipe.into(),
            rating,
            comment: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn like_toggle_round_trip() {
        let (_temp, store) = open_store();
        let now = Utc::now();

        assert_eq!(
            store.apply_like("u1", "r1", now).unwrap(),
            LikeOutcome::Liked
        );
        assert_eq!(store.get("r1").unwrap().unwrap().like_count, 1);

        assert_eq!(
            store.apply_like("u1", "r1", now).unwrap(),
            LikeOutcome::Unliked
        );
        // Toggled back to nothing: the empty row is cleaned up eagerly.
        assert!(store.get("r1").unwrap().is_none());
    }

    #[test]
    fn unlike_without_like_is_a_conflict() {
        let (_temp, store) = open_store();
        let err = store.apply_unlike("u1", "r1").unwrap_err();
        assert!(matches!(err, RecipeError::NotLiked));
    }

    #[test]
    fn incremental_average_tracks_full_recompute() {
        let (_temp, store) = open_store();

        store.apply_review(review("u1", "r1", 5)).unwrap();
        store.apply_review(review("u2", "r1", 4)).unwrap();
        store.apply_review(review("u3", "r1", 2)).unwrap();

        let stats = store.get("r1").unwrap().unwrap();
        assert_eq!(stats.review_count, 3);
        assert_eq!(stats.average_rating, 3.67);

        store
            .edit_review("u3", "r1", Some(5), None, Utc::now())
            .unwrap();
        let stats = store.get("r1").unwrap().unwrap();
        assert_eq!(stats.average_rating, 4.67);

        store.delete_review("u1", "r1").unwrap();
        let stats = store.get("r1").unwrap().unwrap();
        assert_eq!(stats.review_count, 2);
        assert_eq!(stats.average_rating, 4.5);

        assert!(store.detect_drift("r1").unwrap().is_none());
    }

    #[test]
    fn duplicate_review_is_rejected() {
        let (_temp, store) = open_store();
        store.apply_review(review("u1", "r1", 4)).unwrap();
        let err = store.apply_review(review("u1", "r1", 5)).unwrap_err();
        assert!(matches!(err, RecipeError::DuplicateReview));

        let stats = store.get("r1").unwrap().unwrap();
        assert_eq!(stats.review_count, 1);
        assert_eq!(stats.average_rating, 4.0);
    }

    #[test]
    fn deleting_last_review_clears_the_average() {
        let (_temp, store) = open_store();
        store.apply_review(review("u1", "r1", 5)).unwrap();
        store.apply_like("u2", "r1", Utc::now()).unwrap();

        store.delete_review("u1", "r1").unwrap();
        let stats = store.get("r1").unwrap().unwrap();
        assert_eq!(stats.review_count, 0);
        assert_eq!(stats.average_rating, 0.0);
        assert_eq!(stats.like_count, 1);
    }

    #[test]
    fn lock_table_entries_go_away_with_the_recipe() {
        let (_temp, store) = open_store();

        store.apply_like("u1", "r1", Utc::now()).unwrap();
        store.apply_review(review("u1", "r2", 4)).unwrap();
        assert_eq!(store.lock_table_len(), 2);

        store.delete("r1").unwrap();
        assert_eq!(store.lock_table_len(), 1);

        // Recalculating a recipe whose records are all gone also drops its
        // entry; a live recipe keeps one for the next mutation.
        store.delete_review("u1", "r2").unwrap();
        store.recalculate("r2").unwrap();
        assert_eq!(store.lock_table_len(), 0);
    }

    #[test]
    fn recalculate_heals_out_of_band_writes() {
        let (_temp, store) = open_store();
        // Raw inserts bypass stats maintenance entirely.
        store
            .engagement
            .put_like(&LikeRecord {
                user_id: "u1".into(),
                recipe_id: "r1".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        assert!(store.get("r1").unwrap().is_none());

        let drift = store.detect_drift("r1").unwrap();
        assert!(drift.is_some());

        let stats = store.recalculate("r1").unwrap().unwrap();
        assert_eq!(stats.like_count, 1);
        assert!(store.detect_drift("r1").unwrap().is_none());
    }
}
