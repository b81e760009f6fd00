//! Error types for the catalog.

use cube_common::GeoError;
use thiserror::Error;

/// Errors raised while defining, indexing or searching catalog entries.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A document or definition failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A search could not be planned.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// No product matches a raw dataset document.
    #[error("no matching product: {0}")]
    NoMatch(String),

    /// More than one product matches a raw dataset document.
    #[error("document matches multiple products: {}", candidates.join(", "))]
    AmbiguousMatch { candidates: Vec<String> },

    /// The change would break referential integrity or is an unsafe update.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Backing store failure.
    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Geo(#[from] GeoError),
}

impl CatalogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// True for product classification failures (`NoMatch`, `AmbiguousMatch`).
    pub fn is_match_error(&self) -> bool {
        matches!(self, Self::NoMatch(_) | Self::AmbiguousMatch { .. })
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Reasons a search request is rejected before touching the index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("unknown search field: {0}")]
    UnknownField(String),

    /// Unscoped search where a field has different types across metadata types.
    #[error("field '{field}' is ambiguous across products ({}); scope the search by product", types.join(", "))]
    AmbiguousField { field: String, types: Vec<String> },

    #[error("unsupported predicate on '{field}': {reason}")]
    UnsupportedPredicate { field: String, reason: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
