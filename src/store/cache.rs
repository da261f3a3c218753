use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Database, key_with_segments};
use crate::error::Result;

const PREFIX_RANK: &str = "rank";

/// The two ranked projections this service maintains. Each view is one row
/// in the cache table, keyed by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankView {
    TopRated,
    Trending,
}

impl RankView {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopRated => "top-rated",
            Self::Trending => "trending",
        }
    }
}

impl fmt::Display for RankView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-optimized projection served from the ranking cache; never the full
/// recipe document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeSummary {
    pub recipe_id: String,
    pub name: String,
    pub image: Option<String>,
    pub average_rating: f64,
    pub review_count: u64,
    pub like_count: u64,
    pub cuisine_region: Option<String>,
    pub religious_restriction: Option<String>,
    pub dietary_restriction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingCacheEntry {
    pub updated_at: DateTime<Utc>,
    pub entries: Vec<RecipeSummary>,
}

/// Last computed ranked lists. Written only by the refresh path, read by
/// everyone else; each view is replaced wholesale with a single put, so a
/// reader never observes a partially written list.
pub struct RankingCacheStore {
    db: Arc<Database>,
}

impl RankingCacheStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, view: RankView) -> Result<Option<RankingCacheEntry>> {
        match self.db.get(&rank_key(view))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn replace(
        &self,
        view: RankView,
        entries: Vec<RecipeSummary>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let entry = RankingCacheEntry {
            updated_at,
            entries,
        };
        self.db
            .put(rank_key(view), serde_json::to_vec(&entry)?)
    }
}

fn rank_key(view: RankView) -> Vec<u8> {
    key_with_segments(&[PREFIX_RANK, view.as_str()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(recipe_id: &str) -> RecipeSummary {
        RecipeSummary {
            recipe_id: recipe_id.into(),
            name: format!("recipe {recipe_id}"),
            image: None,
            average_rating: 4.5,
            review_count: 3,
            like_count: 7,
            cuisine_region: None,
            religious_restriction: None,
            dietary_restriction: None,
        }
    }

    #[test]
    fn replace_overwrites_the_whole_view() {
        let temp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(temp.path().join("db")).unwrap());
        let store = RankingCacheStore::new(db);

        assert!(store.get(RankView::TopRated).unwrap().is_none());

        store
            .replace(RankView::TopRated, vec![summary("r1"), summary("r2")], Utc::now())
            .unwrap();
        store
            .replace(RankView::TopRated, vec![summary("r3")], Utc::now())
            .unwrap();

        let entry = store.get(RankView::TopRated).unwrap().unwrap();
        assert_eq!(entry.entries.len(), 1);
        assert_eq!(entry.entries[0].recipe_id, "r3");

        // Views do not bleed into each other.
        assert!(store.get(RankView::Trending).unwrap().is_none());
    }
}
