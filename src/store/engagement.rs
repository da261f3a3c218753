use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use serde::{Deserialize, Serialize};

use super::{Database, key_with_segments, prefix_with_segments, segment_after};
use crate::error::Result;

const PREFIX_LIKE: &str = "like";
const PREFIX_LIKE_USER: &str = "like-user";
const PREFIX_REVIEW: &str = "review";
const PREFIX_REVIEW_USER: &str = "review-user";

/// A user liking a recipe. Unique per `(user_id, recipe_id)`; a repeated
/// like toggles the record away again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeRecord {
    pub user_id: String,
    pub recipe_id: String,
    pub created_at: DateTime<Utc>,
}

/// One review per user per recipe; edits replace rating and comment in
/// place and refresh `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub user_id: String,
    pub recipe_id: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Raw like/review event records. Keyed primarily by recipe so per-recipe
/// scans are a single prefix walk, with a by-user index for cascades.
pub struct EngagementStore {
    db: Arc<Database>,
}

impl EngagementStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_like(&self, recipe_id: &str, user_id: &str) -> Result<Option<LikeRecord>> {
        match self.db.get(&like_key(recipe_id, user_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Direct insert, bypassing stats maintenance. Used for backfills and
    /// seeding; follow with a recalculate to restore the aggregate invariant.
    pub fn put_like(&self, like: &LikeRecord) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch_put_like(&mut batch, like)?;
        self.db.write(batch)
    }

    pub fn likes_for_recipe(&self, recipe_id: &str) -> Result<Vec<LikeRecord>> {
        let prefix = prefix_with_segments(&[PREFIX_LIKE, recipe_id]);
        let mut likes = Vec::new();
        self.db.scan_prefix(&prefix, |_, value| {
            likes.push(serde_json::from_slice(value)?);
            Ok(true)
        })?;
        Ok(likes)
    }

    /// All likes across every recipe. The trending computation filters these
    /// by window; volumes are bounded by one record per (user, recipe) pair.
    pub fn all_likes(&self) -> Result<Vec<LikeRecord>> {
        let prefix = prefix_with_segments(&[PREFIX_LIKE]);
        let mut likes = Vec::new();
        self.db.scan_prefix(&prefix, |_, value| {
            likes.push(serde_json::from_slice(value)?);
            Ok(true)
        })?;
        Ok(likes)
    }

    pub fn liked_recipes_of_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.user_index_ids(PREFIX_LIKE_USER, user_id)
    }

    pub fn get_review(&self, recipe_id: &str, user_id: &str) -> Result<Option<ReviewRecord>> {
        match self.db.get(&review_key(recipe_id, user_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn reviews_for_recipe(&self, recipe_id: &str) -> Result<Vec<ReviewRecord>> {
        let prefix = prefix_with_segments(&[PREFIX_REVIEW, recipe_id]);
        let mut reviews = Vec::new();
        self.db.scan_prefix(&prefix, |_, value| {
            reviews.push(serde_json::from_slice(value)?);
            Ok(true)
        })?;
        Ok(reviews)
    }

    pub fn reviewed_recipes_of_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.user_index_ids(PREFIX_REVIEW_USER, user_id)
    }

    fn user_index_ids(&self, prefix_name: &str, user_id: &str) -> Result<Vec<String>> {
        let prefix = prefix_with_segments(&[prefix_name, user_id]);
        let mut ids = Vec::new();
        self.db.scan_prefix(&prefix, |key, _| {
            if let Some(id) = segment_after(key, &prefix) {
                ids.push(id.to_string());
            }
            Ok(true)
        })?;
        Ok(ids)
    }
}

fn like_key(recipe_id: &str, user_id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_LIKE, recipe_id, user_id])
}

fn like_user_key(user_id: &str, recipe_id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_LIKE_USER, user_id, recipe_id])
}

fn review_key(recipe_id: &str, user_id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_REVIEW, recipe_id, user_id])
}

fn review_user_key(user_id: &str, recipe_id: &str) -> Vec<u8> {
    key_with_segments(&[PREFIX_REVIEW_USER, user_id, recipe_id])
}

pub(crate) fn batch_put_like(batch: &mut WriteBatch, like: &LikeRecord) -> Result<()> {
    batch.put(
        like_key(&like.recipe_id, &like.user_id),
        serde_json::to_vec(like)?,
    );
    batch.put(like_user_key(&like.user_id, &like.recipe_id), Vec::new());
    Ok(())
}

pub(crate) fn batch_delete_like(batch: &mut WriteBatch, recipe_id: &str, user_id: &str) {
    batch.delete(like_key(recipe_id, user_id));
    batch.delete(like_user_key(user_id, recipe_id));
}

pub(crate) fn batch_put_review(batch: &mut WriteBatch, review: &ReviewRecord) -> Result<()> {
    batch.put(
        review_key(&review.recipe_id, &review.user_id),
        serde_json::to_vec(review)?,
    );
    batch.put(
        review_user_key(&review.user_id, &review.recipe_id),
        Vec::new(),
    );
    Ok(())
}

pub(crate) fn batch_delete_review(batch: &mut WriteBatch, recipe_id: &str, user_id: &str) {
    batch.delete(review_key(recipe_id, user_id));
    batch.delete(review_user_key(user_id, recipe_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, EngagementStore) {
        let temp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(temp.path().join("db")).unwrap());
        (temp, EngagementStore::new(db))
    }

    #[test]
    fn like_indexes_stay_in_sync() {
        let (_temp, store) = open_store();
        store
            .put_like(&LikeRecord {
                user_id: "u1".into(),
                recipe_id: "r1".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .put_like(&LikeRecord {
                user_id: "u1".into(),
                recipe_id: "r2".into(),
                created_at: Utc::now(),
            })
            .unwrap();

        assert!(store.get_like("r1", "u1").unwrap().is_some());
        let mut liked = store.liked_recipes_of_user("u1").unwrap();
        liked.sort();
        assert_eq!(liked, vec!["r1", "r2"]);
        assert_eq!(store.likes_for_recipe("r1").unwrap().len(), 1);
    }
}
