//! Ingestion defaults.

use serde::{Deserialize, Serialize};

/// Defaults applied to every batch an [`Ingester`](crate::Ingester) indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Require every lineage source to be indexed or present in the batch.
    pub verify_lineage: bool,

    /// Store lineage links alongside each dataset.
    pub with_lineage: bool,

    /// Accept an explicit product even when its metadata template does not
    /// match the document.
    pub ignore_product_mismatch: bool,

    /// Match and validate without writing to the index.
    pub dry_run: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            verify_lineage: true,
            with_lineage: true,
            ignore_product_mismatch: false,
            dry_run: false,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl IngestionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(flag) = env_flag("DATACUBE_INGEST_VERIFY_LINEAGE") {
            config.verify_lineage = flag;
        }
        if let Some(flag) = env_flag("DATACUBE_INGEST_WITH_LINEAGE") {
            config.with_lineage = flag;
        }
        if let Some(flag) = env_flag("DATACUBE_INGEST_IGNORE_MISMATCH") {
            config.ignore_product_mismatch = flag;
        }
        if let Some(flag) = env_flag("DATACUBE_INGEST_DRY_RUN") {
            config.dry_run = flag;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.verify_lineage && !self.with_lineage {
            return Err("verify_lineage requires with_lineage".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = IngestionConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.verify_lineage);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_verify_without_lineage_rejected() {
        let config = IngestionConfig {
            with_lineage: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IngestionConfig {
            with_lineage: false,
            verify_lineage: false,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
