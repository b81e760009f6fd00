//! Configuration for the loader.

use serde::{Deserialize, Serialize};

use crate::load::{IoErrorPolicy, LoadOptions};
use crate::resampling::Resampling;

/// Configuration for loading datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// What to do when one dataset's band cannot be read.
    pub io_error_policy: IoErrorPolicy,

    /// Resampling used when a query names none.
    pub default_resampling: Resampling,

    /// Edge length in pixels of the square chunks of a lazy load.
    pub chunk_size: usize,

    /// Worker threads for parallel lazy computation. 0 uses rayon's default.
    pub workers: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            io_error_policy: IoErrorPolicy::Skip,
            default_resampling: Resampling::Nearest,
            chunk_size: 512,
            workers: 0,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATACUBE_IO_ERROR_POLICY") {
            config.io_error_policy = IoErrorPolicy::from_str(&val);
        }

        if let Ok(val) = std::env::var("DATACUBE_RESAMPLING") {
            config.default_resampling = Resampling::from_str(&val);
        }

        if let Ok(val) = std::env::var("DATACUBE_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                config.chunk_size = size;
            }
        }

        if let Ok(val) = std::env::var("DATACUBE_WORKERS") {
            if let Ok(workers) = val.parse() {
                config.workers = workers;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }

        if self.workers > 1024 {
            return Err("workers must be <= 1024".to_string());
        }

        Ok(())
    }

    /// Load options derived from this configuration.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            io_error_policy: self.io_error_policy,
            resampling: self.default_resampling,
            ..LoadOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.io_error_policy, IoErrorPolicy::Skip);
        assert_eq!(config.default_resampling, Resampling::Nearest);
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.workers, 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoaderConfig::default();
        assert!(config.validate().is_ok());

        config.chunk_size = 0;
        assert!(config.validate().is_err());

        config = LoaderConfig::default();
        config.workers = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_options_follow_config() {
        let config = LoaderConfig {
            io_error_policy: IoErrorPolicy::Abort,
            default_resampling: Resampling::Bilinear,
            ..LoaderConfig::default()
        };
        let options = config.load_options();
        assert_eq!(options.io_error_policy, IoErrorPolicy::Abort);
        assert_eq!(options.resampling, Resampling::Bilinear);
        assert!(options.band_resampling.is_empty());
    }
}
