//! Error types for loading.

use catalog::CatalogError;
use cube_common::GeoError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while loading datasets into a cube.
#[derive(Error, Debug)]
pub enum LoadError {
    /// A requested band is not part of the product.
    #[error("product '{product}' has no measurement '{name}'")]
    MissingMeasurement { product: String, name: String },

    /// Reading one band of one dataset failed.
    #[error("failed to read band '{band}' of dataset {dataset}: {message}")]
    Io {
        dataset: Uuid,
        band: String,
        message: String,
    },

    /// No driver is registered for a URI scheme and format.
    #[error("no driver for '{uri}' (format {format:?})")]
    DriverNotFound { uri: String, format: Option<String> },

    /// No output grid could be determined.
    #[error("cannot determine output grid: {0}")]
    NoGridSpec(String),

    /// The query itself cannot be served.
    #[error("invalid load query: {0}")]
    InvalidQuery(String),

    /// A flag condition does not match the band's flag definitions.
    #[error("invalid mask: {0}")]
    InvalidMask(String),

    /// The computation was cancelled before it finished.
    #[error("load cancelled")]
    Cancelled,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Geo(#[from] GeoError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    InvalidConfig(String),
}

impl LoadError {
    /// Create an Io error for one band of one dataset.
    pub fn io(dataset: Uuid, band: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            dataset,
            band: band.into(),
            message: message.into(),
        }
    }

    /// Create a NoGridSpec error.
    pub fn no_grid_spec(msg: impl Into<String>) -> Self {
        Self::NoGridSpec(msg.into())
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this failure concerns a single dataset read and may be
    /// skipped without invalidating the rest of the load.
    pub fn is_read_failure(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::DriverNotFound { .. } | Self::Geo(_))
    }
}

/// Result type alias using LoadError.
pub type Result<T> = std::result::Result<T, LoadError>;
