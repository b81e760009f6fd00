//! Dataset catalog.
//!
//! Metadata types describe where searchable fields live inside dataset
//! documents, products group datasets sharing a measurement set, and the
//! [`Index`] stores all three and answers spatio-temporal searches.

pub mod changes;
pub mod config;
pub mod dataset;
pub mod error;
pub mod index;
pub mod measurement;
pub mod metadata_type;
pub mod product;
pub mod search;

pub use changes::{Change, UpdateReport};
pub use config::CatalogConfig;
pub use dataset::{resolve_uri, Dataset, GridInfo, LineageRef, MeasurementInfo, TIME_FIELD};
pub use error::{CatalogError, QueryError, Result};
pub use index::{
    CandidateFilter, DatasetRecord, DatasetResource, DatasetSearch, Index, IndexDriver,
    MemoryIndex, MetadataTypeResource, PostgresIndex, ProductResource,
};
pub use measurement::{Bits, DType, FlagDefinition, Measurement};
pub use metadata_type::{FieldType, FieldValue, MetadataType, Offsets, SearchField};
pub use product::{match_product, ExtraDimension, LoadHints, Product, StorageHints, XY};
pub use search::{Predicate, SearchPlan, SearchTerms, Term, TermValue};
