//! Pure ranking computations over aggregate and raw like data. Nothing in
//! here touches storage; the service feeds it snapshots and joins the
//! results with recipe records.

use std::{cmp::Ordering, collections::BTreeMap};

use chrono::{DateTime, Utc};

use crate::store::{LikeRecord, RecipeStats};

/// Fixed-precision rounding used everywhere a running average is stored or
/// published, so repeated incremental updates cannot drift unboundedly.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatedRecipe {
    pub recipe_id: String,
    pub average_rating: f64,
    pub review_count: u64,
    pub weighted_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendingRecipe {
    pub recipe_id: String,
    pub recent_likes: u64,
}

/// Mean of per-recipe average ratings, over recipes that actually have
/// reviews. Returns 0.0 when no recipe has been reviewed yet.
pub fn global_average(stats: &[RecipeStats]) -> f64 {
    let rated: Vec<f64> = stats
        .iter()
        .filter(|s| s.review_count > 0)
        .map(|s| s.average_rating)
        .collect();
    if rated.is_empty() {
        return 0.0;
    }
    rated.iter().sum::<f64>() / rated.len() as f64
}

/// IMDB-style weighted rating: `WR = (v/(v+m))*R + (m/(v+m))*C` where `R` is
/// the recipe's average, `v` its review count, `C` the global average of
/// averages, and `m` the minimum-review threshold. Recipes below the
/// threshold are not listed. Ties break on higher review count, then on
/// recipe id so the output is deterministic.
pub fn top_rated(stats: &[RecipeStats], min_reviews: u64, limit: usize) -> Vec<RatedRecipe> {
    let c = global_average(stats);
    let m = min_reviews as f64;

    let mut rated: Vec<RatedRecipe> = stats
        .iter()
        .filter(|s| s.review_count > 0 && s.review_count >= min_reviews)
        .map(|s| {
            let v = s.review_count as f64;
            let r = s.average_rating;
            let weighted = (v / (v + m)) * r + (m / (v + m)) * c;
            RatedRecipe {
                recipe_id: s.recipe_id.clone(),
                average_rating: s.average_rating,
                review_count: s.review_count,
                weighted_rating: round2(weighted),
            }
        })
        .collect();

    rated.sort_by(|a, b| {
        b.weighted_rating
            .partial_cmp(&a.weighted_rating)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.review_count.cmp(&a.review_count))
            .then_with(|| a.recipe_id.cmp(&b.recipe_id))
    });
    rated.truncate(limit);
    rated
}

/// Likes-in-window popularity. The cutoff is inclusive on the recent side:
/// a like created exactly at `cutoff` still counts. Ties break on recipe id.
pub fn trending(likes: &[LikeRecord], cutoff: DateTime<Utc>, limit: usize) -> Vec<TrendingRecipe> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for like in likes {
        if like.created_at >= cutoff {
            *counts.entry(like.recipe_id.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<TrendingRecipe> = counts
        .into_iter()
        .map(|(recipe_id, recent_likes)| TrendingRecipe {
            recipe_id: recipe_id.to_string(),
            recent_likes,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.recent_likes
            .cmp(&a.recent_likes)
            .then_with(|| a.recipe_id.cmp(&b.recipe_id))
    });
    ranked.truncate(limit);
    ranked
}
