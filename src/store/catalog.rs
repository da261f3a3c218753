use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Database, key_with_segments, prefix_with_segments, segment_after};
use crate::error::{RecipeError, Result};

const PREFIX_RECIPE: &str = "recipe";
const PREFIX_RECIPE_OWNER: &str = "recipe-owner";
const PREFIX_USER: &str = "user";
const PREFIX_NOTIFICATION: &str = "notif";

/// Read-optimized subset of a recipe document. The stats and ranking
/// subsystem never needs the full recipe body (instructions, ingredients),
/// only what goes into a summary card plus the owning user for cascades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub image: Option<String>,
    pub cuisine_region: Option<String>,
    pub religious_restriction: Option<String>,
    pub dietary_restriction: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    /// Partial deletion marker: the account is retired but its recipes,
    /// reviews, and likes stay in place.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub recipe_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Collaborator records: recipes, users, and notifications. The stats core
/// consumes existence checks and summary joins from here and drives the
/// cascade deletes through it.
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn put_recipe(&self, recipe: &RecipeRecord) -> Result<()> {
        self.db.put(
            key_with_segments(&[PREFIX_RECIPE, &recipe.id]),
            serde_json::to_vec(recipe)?,
        )?;
        self.db.put(
            key_with_segments(&[PREFIX_RECIPE_OWNER, &recipe.owner_id, &recipe.id]),
            Vec::new(),
        )
    }

    pub fn get_recipe(&self, recipe_id: &str) -> Result<Option<RecipeRecord>> {
        match self.db.get(&key_with_segments(&[PREFIX_RECIPE, recipe_id]))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn recipe_exists(&self, recipe_id: &str) -> Result<bool> {
        Ok(self
            .db
            .get(&key_with_segments(&[PREFIX_RECIPE, recipe_id]))?
            .is_some())
    }

    pub fn delete_recipe(&self, recipe_id: &str) -> Result<()> {
        if let Some(recipe) = self.get_recipe(recipe_id)? {
            self.db.delete(&key_with_segments(&[
                PREFIX_RECIPE_OWNER,
                &recipe.owner_id,
                recipe_id,
            ]))?;
        }
        self.db
            .delete(&key_with_segments(&[PREFIX_RECIPE, recipe_id]))
    }

    pub fn recipes_by_owner(&self, owner_id: &str) -> Result<Vec<String>> {
        let prefix = prefix_with_segments(&[PREFIX_RECIPE_OWNER, owner_id]);
        let mut ids = Vec::new();
        self.db.scan_prefix(&prefix, |key, _| {
            if let Some(id) = segment_after(key, &prefix) {
                ids.push(id.to_string());
            }
            Ok(true)
        })?;
        Ok(ids)
    }

    pub fn put_user(&self, user: &UserRecord) -> Result<()> {
        self.db.put(
            key_with_segments(&[PREFIX_USER, &user.id]),
            serde_json::to_vec(user)?,
        )
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        match self.db.get(&key_with_segments(&[PREFIX_USER, user_id]))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .db
            .get(&key_with_segments(&[PREFIX_USER, user_id]))?
            .is_some())
    }

    pub fn mark_user_deleted(&self, user_id: &str) -> Result<()> {
        let mut user = self
            .get_user(user_id)?
            .ok_or(RecipeError::UserNotFound)?;
        user.deleted = true;
        self.put_user(&user)
    }

    pub fn delete_user(&self, user_id: &str) -> Result<()> {
        self.db.delete(&key_with_segments(&[PREFIX_USER, user_id]))
    }

    pub fn put_notification(&self, notification: &NotificationRecord) -> Result<()> {
        self.db.put(
            key_with_segments(&[PREFIX_NOTIFICATION, &notification.id]),
            serde_json::to_vec(notification)?,
        )
    }

    pub fn notifications(&self) -> Result<Vec<NotificationRecord>> {
        let prefix = prefix_with_segments(&[PREFIX_NOTIFICATION]);
        let mut records = Vec::new();
        self.db.scan_prefix(&prefix, |_, value| {
            records.push(serde_json::from_slice(value)?);
            Ok(true)
        })?;
        Ok(records)
    }

    pub fn delete_notifications_for_recipe(&self, recipe_id: &str) -> Result<usize> {
        self.delete_notifications_where(|n| n.recipe_id == recipe_id)
    }

    pub fn delete_notifications_for_user(&self, user_id: &str) -> Result<usize> {
        self.delete_notifications_where(|n| n.user_id == user_id)
    }

    fn delete_notifications_where<F>(&self, matches: F) -> Result<usize>
    where
        F: Fn(&NotificationRecord) -> bool,
    {
        let mut doomed = Vec::new();
        for notification in self.notifications()? {
            if matches(&notification) {
                doomed.push(notification.id);
            }
        }
        for id in &doomed {
            self.db
                .delete(&key_with_segments(&[PREFIX_NOTIFICATION, id]))?;
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, CatalogStore) {
        let temp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(temp.path().join("db")).unwrap());
        (temp, CatalogStore::new(db))
    }

    fn recipe(id: &str, owner: &str) -> RecipeRecord {
        RecipeRecord {
            id: id.into(),
            owner_id: owner.into(),
            name: format!("recipe {id}"),
            image: None,
            cuisine_region: Some("thai".into()),
            religious_restriction: None,
            dietary_restriction: Some("vegetarian".into()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn owner_index_tracks_recipes() {
        let (_temp, store) = open_store();
        store.put_recipe(&recipe("r1", "u1")).unwrap();
        store.put_recipe(&recipe("r2", "u1")).unwrap();
        store.put_recipe(&recipe("r3", "u2")).unwrap();

        let mut owned = store.recipes_by_owner("u1").unwrap();
        owned.sort();
        assert_eq!(owned, vec!["r1", "r2"]);

        store.delete_recipe("r1").unwrap();
        assert_eq!(store.recipes_by_owner("u1").unwrap(), vec!["r2"]);
        assert!(!store.recipe_exists("r1").unwrap());
    }

    #[test]
    fn notification_deletes_filter_by_reference() {
        let (_temp, store) = open_store();
        for (id, user, recipe) in [("n1", "u1", "r1"), ("n2", "u2", "r1"), ("n3", "u1", "r2")] {
            store
                .put_notification(&NotificationRecord {
                    id: id.into(),
                    user_id: user.into(),
                    recipe_id: recipe.into(),
                    message: "someone liked your recipe".into(),
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        assert_eq!(store.delete_notifications_for_recipe("r1").unwrap(), 2);
        assert_eq!(store.delete_notifications_for_user("u1").unwrap(), 1);
        assert!(store.notifications().unwrap().is_empty());
    }
}
