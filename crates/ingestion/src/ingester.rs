//! Batch indexing of dataset documents.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use catalog::{match_product, Dataset, Index, Product};

use crate::config::IngestionConfig;
use crate::error::{IngestionError, Result};

/// A raw dataset document and the location it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub uri: String,
    pub doc: Value,
}

impl SourceDocument {
    pub fn new(uri: impl Into<String>, doc: Value) -> Self {
        Self {
            uri: uri.into(),
            doc,
        }
    }

    /// Every document in a (possibly multi-document) YAML stream.
    ///
    /// Multi-document streams share `uri`, with a `#part=N` fragment
    /// appended from the second document on.
    pub fn from_yaml(uri: &str, text: &str) -> Result<Vec<Self>> {
        let mut docs = Vec::new();
        for (i, part) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let doc = Value::deserialize(part).map_err(|e| IngestionError::parse(uri, e))?;
            if doc.is_null() {
                continue;
            }
            let uri = if i == 0 {
                uri.to_string()
            } else {
                format!("{}#part={}", uri, i)
            };
            docs.push(Self { uri, doc });
        }
        Ok(docs)
    }
}

/// Per-batch indexing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Bind every document to this product instead of matching.
    pub product: Option<String>,
    pub verify_lineage: bool,
    pub with_lineage: bool,
    pub ignore_product_mismatch: bool,
    pub dry_run: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

impl From<&IngestionConfig> for IngestOptions {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            product: None,
            verify_lineage: config.verify_lineage,
            with_lineage: config.with_lineage,
            ignore_product_mismatch: config.ignore_product_mismatch,
            dry_run: config.dry_run,
        }
    }
}

impl IngestOptions {
    pub fn with_product(mut self, name: impl Into<String>) -> Self {
        self.product = Some(name.into());
        self
    }

    /// Skip the lineage existence check.
    pub fn without_lineage_check(mut self) -> Self {
        self.verify_lineage = false;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// A document that could not be indexed.
#[derive(Debug)]
pub struct FailedDocument {
    pub uri: String,
    /// Known once the document was bound to a product.
    pub dataset_id: Option<Uuid>,
    pub error: IngestionError,
}

/// Outcome of indexing a batch.
///
/// On a dry run, `indexed` lists the datasets that would have been added.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub indexed: Vec<Uuid>,
    /// Already indexed; their new locations were merged.
    pub existing: Vec<Uuid>,
    pub failed: Vec<FailedDocument>,
}

/// Counts only, for logging and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub indexed: usize,
    pub existing: usize,
    pub failed: usize,
}

impl IngestionReport {
    pub fn total(&self) -> usize {
        self.indexed.len() + self.existing.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            indexed: self.indexed.len(),
            existing: self.existing.len(),
            failed: self.failed.len(),
        }
    }

    pub fn failed_uris(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.uri.as_str()).collect()
    }

    fn fail(&mut self, uri: &str, dataset_id: Option<Uuid>, error: IngestionError) {
        warn!(
            uri = %uri,
            dataset_id = ?dataset_id,
            error = %error,
            "Failed to index document"
        );
        self.failed.push(FailedDocument {
            uri: uri.to_string(),
            dataset_id,
            error,
        });
    }
}

/// A document bound to its product, waiting to be written.
struct Prepared {
    uri: String,
    dataset: Dataset,
}

/// Indexes batches of dataset documents.
#[derive(Debug, Clone)]
pub struct Ingester {
    index: Index,
    config: IngestionConfig,
}

impl Ingester {
    pub fn new(index: Index, config: IngestionConfig) -> Result<Self> {
        config.validate().map_err(IngestionError::InvalidConfig)?;
        Ok(Self { index, config })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Options carrying this ingester's configured defaults.
    pub fn options(&self) -> IngestOptions {
        IngestOptions::from(&self.config)
    }

    /// Index every document of a batch.
    ///
    /// Each document is matched to a product, validated, checked for lineage
    /// and added with its URI as a location. A failing document is recorded
    /// in the report and the rest of the batch carries on. Derived datasets
    /// are written after any of their sources found in the same batch.
    ///
    /// Only a failure to read the product list fails the whole call.
    pub async fn index_documents(
        &self,
        docs: Vec<SourceDocument>,
        options: IngestOptions,
    ) -> Result<IngestionReport> {
        let products = self.index.products().get_all().await?;
        let mut report = IngestionReport::default();

        let mut prepared = Vec::with_capacity(docs.len());
        for source in docs {
            match prepare(&products, &source, &options) {
                Ok(dataset) => prepared.push(Prepared {
                    uri: source.uri,
                    dataset,
                }),
                Err(e) => report.fail(&source.uri, None, e),
            }
        }

        let (ordered, cyclic) = lineage_order(prepared);
        for entry in cyclic {
            let id = entry.dataset.id;
            if options.verify_lineage {
                report.fail(&entry.uri, Some(id), IngestionError::LineageCycle(id));
            } else {
                self.write(entry, &options, &mut report).await;
            }
        }

        let mut batch_failed: HashSet<Uuid> =
            report.failed.iter().filter_map(|f| f.dataset_id).collect();
        let mut accepted: HashSet<Uuid> = HashSet::new();
        for entry in ordered {
            let id = entry.dataset.id;
            if options.verify_lineage {
                let verified = self
                    .verify_sources(&entry.dataset, &accepted, &batch_failed)
                    .await;
                if let Err(e) = verified {
                    batch_failed.insert(id);
                    report.fail(&entry.uri, Some(id), e);
                    continue;
                }
            }
            if self.write(entry, &options, &mut report).await {
                accepted.insert(id);
            } else {
                batch_failed.insert(id);
            }
        }

        let summary = report.summary();
        info!(
            indexed = summary.indexed,
            existing = summary.existing,
            failed = summary.failed,
            dry_run = options.dry_run,
            "Indexed document batch"
        );
        Ok(report)
    }

    /// Index a single document, returning its error directly.
    ///
    /// Returns `true` if the dataset was newly added.
    pub async fn index_document(
        &self,
        source: SourceDocument,
        options: IngestOptions,
    ) -> Result<bool> {
        let mut report = self.index_documents(vec![source], options).await?;
        if let Some(failed) = report.failed.pop() {
            return Err(failed.error);
        }
        Ok(!report.indexed.is_empty())
    }

    async fn verify_sources(
        &self,
        dataset: &Dataset,
        accepted: &HashSet<Uuid>,
        batch_failed: &HashSet<Uuid>,
    ) -> Result<()> {
        let mut unresolved = Vec::new();
        for source in &dataset.sources {
            if batch_failed.contains(&source.source_id) {
                return Err(IngestionError::SourceFailed {
                    id: dataset.id,
                    source_id: source.source_id,
                });
            }
            if !accepted.contains(&source.source_id) && !unresolved.contains(&source.source_id) {
                unresolved.push(source.source_id);
            }
        }
        if unresolved.is_empty() {
            return Ok(());
        }

        let present = self.index.datasets().bulk_has(&unresolved).await?;
        let missing: Vec<Uuid> = unresolved
            .into_iter()
            .zip(present)
            .filter_map(|(id, found)| (!found).then_some(id))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IngestionError::MissingSources {
                id: dataset.id,
                missing,
            })
        }
    }

    /// Add one dataset, recording the outcome. Returns false on failure.
    async fn write(
        &self,
        entry: Prepared,
        options: &IngestOptions,
        report: &mut IngestionReport,
    ) -> bool {
        let id = entry.dataset.id;
        let outcome = if options.dry_run {
            self.index.datasets().has(id).await.map(|found| !found)
        } else {
            self.index.datasets().add(&entry.dataset, options.with_lineage).await
        };

        match outcome {
            Ok(true) => {
                report.indexed.push(id);
                true
            }
            Ok(false) => {
                debug!(id = %id, uri = %entry.uri, "Dataset already indexed");
                report.existing.push(id);
                true
            }
            Err(e) => {
                report.fail(&entry.uri, Some(id), e.into());
                false
            }
        }
    }
}

/// Match a document to its product and validate it.
fn prepare(
    products: &[Arc<Product>],
    source: &SourceDocument,
    options: &IngestOptions,
) -> Result<Dataset> {
    if !source.doc.is_object() {
        return Err(IngestionError::parse(&source.uri, "document is not a mapping"));
    }
    let product = match_product(
        products,
        &source.doc,
        options.product.as_deref(),
        options.ignore_product_mismatch,
    )?;
    Ok(Dataset::new(product, source.doc.clone(), vec![source.uri.clone()])?)
}

/// Order entries so in-batch sources precede the datasets derived from them.
///
/// Entries in, or derived from, a lineage cycle are returned separately in
/// input order.
fn lineage_order(entries: Vec<Prepared>) -> (Vec<Prepared>, Vec<Prepared>) {
    let in_batch: HashSet<Uuid> = entries.iter().map(|e| e.dataset.id).collect();
    let mut placed: HashSet<Uuid> = HashSet::new();
    let mut ordered = Vec::with_capacity(entries.len());
    let mut remaining = entries;

    loop {
        let (ready, rest): (Vec<Prepared>, Vec<Prepared>) = remaining.into_iter().partition(|e| {
            e.dataset
                .sources
                .iter()
                .all(|s| !in_batch.contains(&s.source_id) || placed.contains(&s.source_id))
        });
        remaining = rest;
        if ready.is_empty() {
            break;
        }
        placed.extend(ready.iter().map(|e| e.dataset.id));
        ordered.extend(ready);
    }

    (ordered, remaining)
}
