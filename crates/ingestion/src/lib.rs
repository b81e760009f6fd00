//! Batch indexing of dataset documents into the catalog.
//!
//! An [`Ingester`] takes raw dataset documents together with the URI each
//! was read from, classifies them against the registered products and adds
//! them to the index. Failures are reported per document: a batch never
//! aborts because one of its documents is unmatched, invalid or missing its
//! lineage.

pub mod config;
pub mod error;
mod ingester;

// Re-exports
pub use config::IngestionConfig;
pub use error::{IngestionError, Result};
pub use ingester::{
    FailedDocument, IngestOptions, Ingester, IngestionReport, ReportSummary, SourceDocument,
};
