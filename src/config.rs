use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecipeError, Result};

pub const DEFAULT_PORT: u16 = 7080;
pub const DEFAULT_TOP_RATED_MIN_REVIEWS: u64 = 1;
pub const DEFAULT_TOP_RATED_LIMIT: usize = 2;
pub const DEFAULT_TRENDING_LIMIT: usize = 3;
pub const DEFAULT_TRENDING_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_REFRESH_INTERVAL_HOURS: u64 = 24;
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STORAGE_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Minimum review count a recipe needs before it is eligible for the
    /// top-rated list; doubles as the `m` weight in the Bayesian formula.
    pub top_rated_min_reviews: u64,
    pub top_rated_limit: usize,
    pub trending_limit: usize,
    pub trending_window_days: i64,
    pub refresh_interval_hours: u64,
    pub refresh_timeout_secs: u64,
    pub storage_retry_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Config {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            top_rated_min_reviews: DEFAULT_TOP_RATED_MIN_REVIEWS,
            top_rated_limit: DEFAULT_TOP_RATED_LIMIT,
            trending_limit: DEFAULT_TRENDING_LIMIT,
            trending_window_days: DEFAULT_TRENDING_WINDOW_DAYS,
            refresh_interval_hours: DEFAULT_REFRESH_INTERVAL_HOURS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            storage_retry_attempts: DEFAULT_STORAGE_RETRY_ATTEMPTS,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub top_rated_min_reviews: Option<u64>,
    pub top_rated_limit: Option<usize>,
    pub trending_limit: Option<usize>,
    pub trending_window_days: Option<i64>,
    pub refresh_interval_hours: Option<u64>,
    pub refresh_timeout_secs: Option<u64>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = env::current_dir().map_err(|err| RecipeError::Config(err.to_string()))?;
    path.push(".tastebook");
    path.push("config.toml");
    Ok(path)
}

pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = if let Some(path) = path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        path
    } else {
        default_config_path()?
    };

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let cfg: Config = toml::from_str(&contents)?;
        cfg.ensure_data_dir()?;
        Ok((cfg, config_path))
    } else {
        let cfg = Config::default();
        cfg.ensure_data_dir()?;
        cfg.save(&config_path)?;
        Ok((cfg, config_path))
    }
}

impl Config {
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(dir) = update.data_dir {
            self.data_dir = dir;
        }
        if let Some(min_reviews) = update.top_rated_min_reviews {
            self.top_rated_min_reviews = min_reviews;
        }
        if let Some(limit) = update.top_rated_limit {
            self.top_rated_limit = limit;
        }
        if let Some(limit) = update.trending_limit {
            self.trending_limit = limit;
        }
        if let Some(days) = update.trending_window_days {
            self.trending_window_days = days;
        }
        if let Some(hours) = update.refresh_interval_hours {
            self.refresh_interval_hours = hours;
        }
        if let Some(secs) = update.refresh_timeout_secs {
            self.refresh_timeout_secs = secs;
        }
        self.updated_at = Utc::now();
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn recipe_store_path(&self) -> PathBuf {
        self.data_dir.join("recipe_store")
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_hours.max(1) * 60 * 60)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs.max(1))
    }

    pub fn trending_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.trending_window_days.max(1))
    }
}

fn default_data_dir() -> PathBuf {
    let Ok(current_dir) = env::current_dir() else {
        return PathBuf::from(".tastebook");
    };
    current_dir.join(".tastebook")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.top_rated_min_reviews, 1);
        assert_eq!(cfg.top_rated_limit, 2);
        assert_eq!(cfg.trending_limit, 3);
        assert_eq!(cfg.trending_window_days, 7);
        assert_eq!(cfg.refresh_interval_hours, 24);
    }

    #[test]
    fn saves_and_reloads_updates() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");

        let mut cfg = Config::default();
        cfg.data_dir = temp.path().join("data");
        cfg.apply_update(ConfigUpdate {
            port: Some(9090),
            top_rated_min_reviews: Some(10),
            ..ConfigUpdate::default()
        });
        cfg.save(&path).unwrap();

        let (reloaded, _) = load_or_default(Some(path)).unwrap();
        assert_eq!(reloaded.port, 9090);
        assert_eq!(reloaded.top_rated_min_reviews, 10);
        assert_eq!(reloaded.trending_limit, DEFAULT_TRENDING_LIMIT);
    }
}
