//! Error types for geometry, CRS and time handling.

use thiserror::Error;

/// Result type alias using GeoError.
pub type GeoResult<T> = Result<T, GeoError>;

/// Errors raised by the shared geometry and CRS utilities.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoError {
    #[error("Invalid CRS: {0}")]
    InvalidCrs(String),

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid bounding box: {0}")]
    InvalidBbox(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Transform is not invertible: {0}")]
    NonInvertible(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Invalid time specification: {0}")]
    InvalidTime(String),
}
