//! Error types for the ingestion crate.

use catalog::CatalogError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while indexing a document.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Product matching, validation or the index itself failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to parse document at {uri}: {reason}")]
    Parse { uri: String, reason: String },

    #[error("dataset {id} references sources that are not indexed: {}", join_ids(missing))]
    MissingSources { id: Uuid, missing: Vec<Uuid> },

    /// A source in the same batch could not be indexed.
    #[error("dataset {id} depends on {source_id}, which failed to index")]
    SourceFailed { id: Uuid, source_id: Uuid },

    #[error("dataset {0} is part of, or derived from, a lineage cycle within the batch")]
    LineageCycle(Uuid),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl IngestionError {
    pub fn parse(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the document matched no product or several.
    pub fn is_match_error(&self) -> bool {
        matches!(self, Self::Catalog(e) if e.is_match_error())
    }

    /// True for failures caused by the document's lineage.
    pub fn is_lineage_error(&self) -> bool {
        matches!(
            self,
            Self::MissingSources { .. } | Self::SourceFailed { .. } | Self::LineageCycle(_)
        )
    }
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
