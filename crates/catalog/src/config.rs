//! Configuration for the catalog index.

use serde::{Deserialize, Serialize};

/// How to reach the index backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// PostgreSQL connection URL. `None` selects the in-memory index.
    pub database_url: Option<String>,

    /// Connection pool size.
    pub max_connections: u32,

    /// Create the schema on connect.
    pub auto_migrate: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            auto_migrate: true,
        }
    }
}

impl CatalogConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATACUBE_DB_URL") {
            if !val.trim().is_empty() {
                config.database_url = Some(val);
            }
        }

        if let Ok(val) = std::env::var("DATACUBE_DB_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.max_connections = n;
            }
        }

        if let Ok(val) = std::env::var("DATACUBE_DB_AUTO_MIGRATE") {
            config.auto_migrate = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(format!("unsupported database url: {}", url));
            }
        }

        Ok(())
    }
}
