use std::{sync::Arc, thread, time::Duration};

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::{RecipeError, Result},
    ranking,
    store::{
        CatalogStore, Database, EngagementStore, LikeOutcome, NotificationRecord, RankView,
        RankingCacheStore, RecipeRecord, RecipeStats, RecipeStatsStore, RecipeSummary,
        ReviewRecord, UserRecord,
    },
};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Explicit user-deletion policy. The caller always picks; the service
/// never guesses which one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionMode {
    /// Retire the account but keep its recipes, reviews, likes, and the
    /// aggregates derived from them.
    Partial,
    /// Cascade-delete the user together with everything they own or
    /// authored, recalculating stats of recipes they touched.
    Full,
}

#[derive(Debug, Clone)]
pub struct RankingSettings {
    pub top_rated_min_reviews: u64,
    pub top_rated_limit: usize,
    pub trending_limit: usize,
    pub trending_window: chrono::Duration,
}

impl From<&Config> for RankingSettings {
    fn from(config: &Config) -> Self {
        Self {
            top_rated_min_reviews: config.top_rated_min_reviews,
            top_rated_limit: config.top_rated_limit,
            trending_limit: config.trending_limit,
            trending_window: config.trending_window(),
        }
    }
}

/// Shared context over the catalog, engagement, stats, and cache stores so
/// the HTTP surface, scheduler, and CLI all go through one consistent API.
#[derive(Clone)]
pub struct RecipeService {
    catalog: Arc<CatalogStore>,
    engagement: Arc<EngagementStore>,
    stats: Arc<RecipeStatsStore>,
    cache: Arc<RankingCacheStore>,
    settings: RankingSettings,
    retry_attempts: u32,
}

impl RecipeService {
    pub fn open(config: &Config) -> Result<Self> {
        let db = Arc::new(Database::open(config.recipe_store_path())?);
        let engagement = Arc::new(EngagementStore::new(Arc::clone(&db)));
        Ok(Self {
            catalog: Arc::new(CatalogStore::new(Arc::clone(&db))),
            stats: Arc::new(RecipeStatsStore::new(
                Arc::clone(&db),
                Arc::clone(&engagement),
            )),
            cache: Arc::new(RankingCacheStore::new(Arc::clone(&db))),
            engagement,
            settings: RankingSettings::from(config),
            retry_attempts: config.storage_retry_attempts,
        })
    }

    pub fn catalog(&self) -> Arc<CatalogStore> {
        Arc::clone(&self.catalog)
    }

    pub fn engagement(&self) -> Arc<EngagementStore> {
        Arc::clone(&self.engagement)
    }

    pub fn stats(&self) -> Arc<RecipeStatsStore> {
        Arc::clone(&self.stats)
    }

    pub fn cache(&self) -> Arc<RankingCacheStore> {
        Arc::clone(&self.cache)
    }

    // ---- mutation surface ----------------------------------------------

    pub fn toggle_like(&self, user_id: &str, recipe_id: &str) -> Result<LikeOutcome> {
        self.ensure_recipe_exists(recipe_id)?;
        self.with_retry(|| self.stats.apply_like(user_id, recipe_id, Utc::now()))
    }

    pub fn unlike(&self, user_id: &str, recipe_id: &str) -> Result<()> {
        self.ensure_recipe_exists(recipe_id)?;
        self.with_retry(|| self.stats.apply_unlike(user_id, recipe_id))
    }

    pub fn submit_review(
        &self,
        user_id: &str,
        recipe_id: &str,
        rating: u8,
        comment: impl Into<String>,
    ) -> Result<()> {
        ensure_rating(rating)?;
        self.ensure_recipe_exists(recipe_id)?;
        let review = ReviewRecord {
            user_id: user_id.to_string(),
            recipe_id: recipe_id.to_string(),
            rating,
            comment: comment.into(),
            created_at: Utc::now(),
        };
        self.with_retry(|| self.stats.apply_review(review.clone()))
    }

    pub fn edit_review(
        &self,
        user_id: &str,
        recipe_id: &str,
        new_rating: Option<u8>,
        new_comment: Option<String>,
    ) -> Result<()> {
        if let Some(rating) = new_rating {
            ensure_rating(rating)?;
        }
        self.ensure_recipe_exists(recipe_id)?;
        self.with_retry(|| {
            self.stats.edit_review(
                user_id,
                recipe_id,
                new_rating,
                new_comment.clone(),
                Utc::now(),
            )
        })
    }

    pub fn delete_review(&self, user_id: &str, recipe_id: &str) -> Result<()> {
        self.ensure_recipe_exists(recipe_id)?;
        self.with_retry(|| self.stats.delete_review(user_id, recipe_id))
    }

    // ---- read surface --------------------------------------------------

    /// `None` is the "not yet available" sentinel: no like or review has
    /// ever touched the recipe.
    pub fn get_stats(&self, recipe_id: &str) -> Result<Option<RecipeStats>> {
        self.ensure_recipe_exists(recipe_id)?;
        self.stats.get(recipe_id)
    }

    /// Cache read only; an empty list is a valid answer, never an error.
    pub fn get_top_rated(&self) -> Result<Vec<RecipeSummary>> {
        Ok(self
            .cache
            .get(RankView::TopRated)?
            .map(|entry| entry.entries)
            .unwrap_or_default())
    }

    pub fn get_trending(&self) -> Result<Vec<RecipeSummary>> {
        Ok(self
            .cache
            .get(RankView::Trending)?
            .map(|entry| entry.entries)
            .unwrap_or_default())
    }

    // ---- maintenance ---------------------------------------------------

    /// Recomputes both ranked views and swaps them into the cache. Each view
    /// is replaced with a single atomic write; a failure before the swap
    /// leaves the previous contents untouched.
    pub fn refresh_rankings(&self) -> Result<()> {
        let stats_rows = self.stats.all()?;
        let rated = ranking::top_rated(
            &stats_rows,
            self.settings.top_rated_min_reviews,
            self.settings.top_rated_limit,
        );

        let likes = self.engagement.all_likes()?;
        let cutoff = Utc::now() - self.settings.trending_window;
        let trending = ranking::trending(&likes, cutoff, self.settings.trending_limit);

        let top_entries: Vec<RecipeSummary> = rated
            .iter()
            .filter_map(|r| self.summarize(&r.recipe_id).transpose())
            .collect::<Result<_>>()?;
        let trending_entries: Vec<RecipeSummary> = trending
            .iter()
            .filter_map(|t| self.summarize(&t.recipe_id).transpose())
            .collect::<Result<_>>()?;

        let now = Utc::now();
        self.cache.replace(RankView::TopRated, top_entries, now)?;
        self.cache.replace(RankView::Trending, trending_entries, now)?;

        info!(
            top_rated = rated.len(),
            trending = trending.len(),
            "ranking cache refreshed"
        );
        Ok(())
    }

    pub fn recalculate(&self, recipe_id: &str) -> Result<Option<RecipeStats>> {
        self.stats.recalculate(recipe_id)
    }

    /// Drift audit: compares the stored aggregate against a full rescan and
    /// repairs it in place. Never surfaces to callers.
    pub fn audit_recipe(&self, recipe_id: &str) -> Result<()> {
        if let Some(fresh) = self.stats.detect_drift(recipe_id)? {
            warn!(
                recipe_id,
                review_count = fresh.review_count,
                like_count = fresh.like_count,
                "recipe stats drifted from raw records; recalculating"
            );
            self.stats.recalculate(recipe_id)?;
        }
        Ok(())
    }

    // ---- cascade coordinator -------------------------------------------

    /// Removes a recipe together with every record referencing it.
    /// Dependents go first so a crash mid-sequence leaves only orphaned
    /// dependents, never a stats row pointing at a missing recipe. Safe to
    /// re-invoke on a half-deleted recipe.
    pub fn delete_recipe_cascade(&self, recipe_id: &str) -> Result<()> {
        let recipe = self.catalog.get_recipe(recipe_id)?;
        let mut removed = 0usize;

        for review in self.engagement.reviews_for_recipe(recipe_id)? {
            match self.stats.delete_review(&review.user_id, recipe_id) {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    recipe_id,
                    user_id = %review.user_id,
                    "failed to delete review during cascade: {err}"
                ),
            }
        }
        for like in self.engagement.likes_for_recipe(recipe_id)? {
            match self.stats.apply_unlike(&like.user_id, recipe_id) {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    recipe_id,
                    user_id = %like.user_id,
                    "failed to delete like during cascade: {err}"
                ),
            }
        }

        removed += self.catalog.delete_notifications_for_recipe(recipe_id)?;
        if self.stats.get(recipe_id)?.is_some() {
            removed += 1;
        }
        self.stats.delete(recipe_id)?;

        match recipe {
            Some(_) => {
                self.catalog.delete_recipe(recipe_id)?;
                info!(recipe_id, removed, "recipe cascade complete");
                Ok(())
            }
            None if removed > 0 => {
                // Resumed a previously interrupted cascade.
                info!(recipe_id, removed, "recipe cascade resumed and completed");
                Ok(())
            }
            None => Err(RecipeError::RecipeNotFound),
        }
    }

    /// User deletion under an explicit policy. Partial anonymizes the
    /// account in place; full cascades through owned recipes and authored
    /// engagement, recalculating affected aggregates from raw records
    /// rather than chaining decrements.
    pub fn delete_user_cascade(&self, user_id: &str, mode: DeletionMode) -> Result<()> {
        if !self.catalog.user_exists(user_id)? {
            return Err(RecipeError::UserNotFound);
        }

        if mode == DeletionMode::Partial {
            self.catalog.mark_user_deleted(user_id)?;
            info!(user_id, "user retired (partial delete)");
            return Ok(());
        }

        for recipe_id in self.catalog.recipes_by_owner(user_id)? {
            if let Err(err) = self.delete_recipe_cascade(&recipe_id) {
                warn!(
                    user_id,
                    recipe_id, "failed to cascade owned recipe during user delete: {err}"
                );
            }
        }

        // Engagement the user left on other people's recipes: drop the raw
        // record, then rebuild that recipe's stats from scratch.
        for recipe_id in self.engagement.reviewed_recipes_of_user(user_id)? {
            if let Err(err) = self
                .stats
                .delete_review(user_id, &recipe_id)
                .and_then(|()| self.stats.recalculate(&recipe_id).map(|_| ()))
            {
                warn!(
                    user_id,
                    recipe_id, "failed to remove review during user delete: {err}"
                );
            }
        }
        for recipe_id in self.engagement.liked_recipes_of_user(user_id)? {
            if let Err(err) = self
                .stats
                .apply_unlike(user_id, &recipe_id)
                .and_then(|()| self.stats.recalculate(&recipe_id).map(|_| ()))
            {
                warn!(
                    user_id,
                    recipe_id, "failed to remove like during user delete: {err}"
                );
            }
        }

        self.catalog.delete_notifications_for_user(user_id)?;
        self.catalog.delete_user(user_id)?;
        info!(user_id, "user cascade complete");
        Ok(())
    }

    // ---- seeding (collaborator stand-ins) ------------------------------

    pub fn add_recipe(&self, recipe: RecipeRecord) -> Result<RecipeRecord> {
        self.catalog.put_recipe(&recipe)?;
        Ok(recipe)
    }

    pub fn add_user(&self, user: UserRecord) -> Result<UserRecord> {
        self.catalog.put_user(&user)?;
        Ok(user)
    }

    pub fn add_notification(&self, notification: NotificationRecord) -> Result<()> {
        self.catalog.put_notification(&notification)
    }

    // ---- internals -----------------------------------------------------

    fn ensure_recipe_exists(&self, recipe_id: &str) -> Result<()> {
        if self.catalog.recipe_exists(recipe_id)? {
            Ok(())
        } else {
            Err(RecipeError::RecipeNotFound)
        }
    }

    /// Joins a ranked id with its recipe record and current stats. A recipe
    /// deleted between computation and join is skipped, not an error.
    fn summarize(&self, recipe_id: &str) -> Result<Option<RecipeSummary>> {
        let Some(recipe) = self.catalog.get_recipe(recipe_id)? else {
            return Ok(None);
        };
        let stats = self
            .stats
            .get(recipe_id)?
            .unwrap_or(RecipeStats {
                recipe_id: recipe_id.to_string(),
                review_count: 0,
                average_rating: 0.0,
                like_count: 0,
            });

        Ok(Some(RecipeSummary {
            recipe_id: recipe.id,
            name: recipe.name,
            image: recipe.image,
            average_rating: stats.average_rating,
            review_count: stats.review_count,
            like_count: stats.like_count,
            cuisine_region: recipe.cuisine_region,
            religious_restriction: recipe.religious_restriction,
            dietary_restriction: recipe.dietary_restriction,
        }))
    }

    fn with_retry<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match operation() {
                Err(err) if err.is_transient() && attempt + 1 < self.retry_attempts.max(1) => {
                    attempt += 1;
                    warn!(attempt, "transient storage error, retrying: {err}");
                    thread::sleep(RETRY_BACKOFF * attempt);
                }
                result => return result,
            }
        }
    }
}

fn ensure_rating(rating: u8) -> Result<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(RecipeError::InvalidRating(rating))
    }
}
