use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::browser::PoolOptions;
use crate::db::RepositoryOptions;
use crate::error::{AppError, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Upper bound on pages open at once in the browser pool.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_headless")]
    pub headless: bool,

    pub chrome_executable: Option<PathBuf>,

    /// Cap applied to `count` when listing the latest articles.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsulizer");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir
        .join("newsulizer.sqlite3")
        .to_string_lossy()
        .to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_navigation_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    800
}

fn default_headless() -> bool {
    true
}

fn default_max_page_size() -> u32 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_concurrency: default_max_concurrency(),
            navigation_timeout_secs: default_navigation_timeout(),
            user_agent: default_user_agent(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            headless: default_headless(),
            chrome_executable: None,
            max_page_size: default_max_page_size(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config = Self::from_toml(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.max_concurrency == 0 {
            return Err(AppError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsulizer")
            .join("config.toml")
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_concurrency: self.max_concurrency,
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            user_agent: self.user_agent.clone(),
            viewport: (self.viewport_width, self.viewport_height),
            headless: self.headless,
            chrome_executable: self.chrome_executable.clone(),
        }
    }

    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            max_page_size: self.max_page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = Config::from_toml("db_path = \"/tmp/news.sqlite3\"\n").unwrap();
        assert_eq!(config.db_path, "/tmp/news.sqlite3");
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.navigation_timeout_secs, 60);
        assert_eq!(config.max_page_size, 50);
        assert!(config.headless);
        assert!(config.chrome_executable.is_none());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = Config::from_toml("db_path = \"x\"\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn pool_options_carry_browser_settings() {
        let config = Config::from_toml(
            "db_path = \"x\"\nnavigation_timeout_secs = 5\nviewport_width = 800\nviewport_height = 600\n",
        )
        .unwrap();
        let options = config.pool_options();
        assert_eq!(options.navigation_timeout, Duration::from_secs(5));
        assert_eq!(options.viewport, (800, 600));
        assert_eq!(options.user_agent, DEFAULT_USER_AGENT);
    }
}
