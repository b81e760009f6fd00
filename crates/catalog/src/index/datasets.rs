use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::error::{CatalogError, Result};
use crate::product::Product;
use crate::search::{SearchPlan, SearchTerms};

use super::{CandidateFilter, DatasetRecord, IndexDriver};

/// Candidates fetched from the driver per round trip.
const PAGE_SIZE: usize = 500;

/// Dataset repository.
#[derive(Clone)]
pub struct DatasetResource {
    driver: Arc<dyn IndexDriver>,
}

impl DatasetResource {
    pub(crate) fn new(driver: Arc<dyn IndexDriver>) -> Self {
        Self { driver }
    }

    async fn bind(&self, record: DatasetRecord) -> Result<Dataset> {
        let product = self
            .driver
            .get_product(&record.product)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("product '{}'", record.product)))?;
        Ok(record.into_dataset(product))
    }

    /// Index a dataset with its locations.
    ///
    /// Returns `false` if it was already indexed; new locations are merged
    /// into the existing record.
    pub async fn add(&self, dataset: &Dataset, with_lineage: bool) -> Result<bool> {
        if self.driver.get_product(&dataset.product.name).await?.is_none() {
            return Err(CatalogError::not_found(format!(
                "product '{}'",
                dataset.product.name
            )));
        }

        let record = DatasetRecord::from_dataset(dataset);
        let inserted = self.driver.insert_dataset(&record, with_lineage).await?;
        if inserted {
            info!(
                id = %dataset.id,
                product = %dataset.product.name,
                locations = dataset.uris.len(),
                "Indexed dataset"
            );
        } else {
            debug!(id = %dataset.id, "Dataset already indexed; merged locations");
        }
        Ok(inserted)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Dataset>> {
        match self.driver.get_dataset(id).await? {
            Some(record) => Ok(Some(self.bind(record).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Dataset>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ds) = self.get(*id).await? {
                out.push(ds);
            }
        }
        Ok(out)
    }

    pub async fn has(&self, id: Uuid) -> Result<bool> {
        let found = self.driver.datasets_exist(&[id]).await?;
        Ok(found.first().copied().unwrap_or(false))
    }

    pub async fn bulk_has(&self, ids: &[Uuid]) -> Result<Vec<bool>> {
        self.driver.datasets_exist(ids).await
    }

    /// Datasets derived from `id`.
    pub async fn get_derived(&self, id: Uuid) -> Result<Vec<Dataset>> {
        let ids = self.driver.derived_ids(id).await?;
        self.get_many(&ids).await
    }

    /// Archive datasets.
    ///
    /// Refused with `Conflict` while an active dataset outside `ids` lists
    /// one of them as a lineage source, unless `force` is set.
    pub async fn archive(&self, ids: &[Uuid], force: bool) -> Result<u64> {
        if !force {
            for id in ids {
                for derived in self.driver.derived_ids(*id).await? {
                    if ids.contains(&derived) {
                        continue;
                    }
                    let active = self
                        .driver
                        .get_dataset(derived)
                        .await?
                        .map(|r| r.archived_time.is_none())
                        .unwrap_or(false);
                    if active {
                        return Err(CatalogError::conflict(format!(
                            "dataset {} is a source of active dataset {}",
                            id, derived
                        )));
                    }
                }
            }
        }
        let count = self.driver.set_archived(ids, Some(Utc::now())).await?;
        info!(count, force, "Archived datasets");
        Ok(count)
    }

    pub async fn restore(&self, ids: &[Uuid]) -> Result<u64> {
        let count = self.driver.set_archived(ids, None).await?;
        info!(count, "Restored datasets");
        Ok(count)
    }

    pub async fn add_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        self.driver.insert_location(id, uri).await
    }

    pub async fn remove_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        self.driver.delete_location(id, uri).await
    }

    pub async fn archive_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        self.driver
            .set_location_archived(id, uri, Some(Utc::now()))
            .await
    }

    pub async fn restore_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        self.driver.set_location_archived(id, uri, None).await
    }

    pub async fn get_locations(&self, id: Uuid) -> Result<Vec<String>> {
        self.driver.locations(id, false).await
    }

    pub async fn get_archived_locations(&self, id: Uuid) -> Result<Vec<String>> {
        self.driver.locations(id, true).await
    }

    /// Resolve search terms into a restartable search.
    pub async fn search_stream(&self, terms: &SearchTerms) -> Result<DatasetSearch> {
        let products = self.driver.list_products().await?;
        let plan = SearchPlan::new(terms, &products)?;
        Ok(DatasetSearch {
            driver: self.driver.clone(),
            plan: Arc::new(plan),
        })
    }

    /// Run a search to completion. No match is an empty result.
    pub async fn search(&self, terms: &SearchTerms) -> Result<Vec<Dataset>> {
        self.search_stream(terms).await?.collect().await
    }

    pub async fn count(&self, terms: &SearchTerms) -> Result<usize> {
        Ok(self.search(terms).await?.len())
    }

    /// Search results partitioned by product.
    pub async fn search_by_product(
        &self,
        terms: &SearchTerms,
    ) -> Result<Vec<(Arc<Product>, Vec<Dataset>)>> {
        let mut grouped: Vec<(Arc<Product>, Vec<Dataset>)> = Vec::new();
        for ds in self.search(terms).await? {
            match grouped.iter_mut().find(|(p, _)| p.name == ds.product.name) {
                Some((_, list)) => list.push(ds),
                None => grouped.push((ds.product.clone(), vec![ds])),
            }
        }
        Ok(grouped)
    }
}

/// A planned search. Each call to [`DatasetSearch::stream`] re-issues the
/// query against the index.
#[derive(Clone)]
pub struct DatasetSearch {
    driver: Arc<dyn IndexDriver>,
    plan: Arc<SearchPlan>,
}

impl DatasetSearch {
    pub fn plan(&self) -> &SearchPlan {
        &self.plan
    }

    /// Lazily stream matching datasets, fetching candidates page by page.
    pub fn stream(&self) -> BoxStream<'static, Result<Dataset>> {
        if self.plan.is_empty() {
            return stream::empty().boxed();
        }
        if self.plan.order_by.is_some() {
            // Ordering needs every match first.
            let this = self.clone();
            return stream::once(async move {
                let all: Vec<Dataset> = this.pages().try_collect().await?;
                Ok::<_, CatalogError>(this.plan.finish(all))
            })
            .map_ok(|all| stream::iter(all.into_iter().map(Ok::<Dataset, CatalogError>)))
            .try_flatten()
            .boxed();
        }
        match self.plan.limit {
            Some(n) => self.pages().take(n).boxed(),
            None => self.pages(),
        }
    }

    pub async fn collect(&self) -> Result<Vec<Dataset>> {
        self.stream().try_collect().await
    }

    fn pages(&self) -> BoxStream<'static, Result<Dataset>> {
        let driver = self.driver.clone();
        let plan = self.plan.clone();

        stream::try_unfold(Some(0usize), move |offset| {
            let driver = driver.clone();
            let plan = plan.clone();
            async move {
                let Some(offset) = offset else {
                    return Ok::<_, CatalogError>(None);
                };
                let filter = CandidateFilter {
                    offset,
                    limit: Some(PAGE_SIZE),
                    ..plan.prefilter()
                };
                let page = driver.candidates(&filter).await?;
                let next = (page.len() == PAGE_SIZE).then_some(offset + PAGE_SIZE);

                let matched: Vec<Dataset> = page
                    .into_iter()
                    .filter_map(|record| {
                        let product = plan.product(&record.product)?.clone();
                        Some(record.into_dataset(product))
                    })
                    .filter(|ds| plan.matches(ds))
                    .collect();
                Ok(Some((matched, next)))
            }
        })
        .map_ok(|batch| stream::iter(batch.into_iter().map(Ok::<Dataset, CatalogError>)))
        .try_flatten()
        .boxed()
    }
}
