//! Index stored in PostgreSQL.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use cube_common::{BoundingBox, TimeRange};

use crate::dataset::LineageRef;
use crate::error::{CatalogError, Result};
use crate::metadata_type::MetadataType;
use crate::product::Product;

use super::{CandidateFilter, DatasetRecord, IndexDriver};

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> CatalogError {
    move |e| CatalogError::Database(format!("{} failed: {}", context, e))
}

/// Database connection pool and index operations.
pub struct PostgresIndex {
    pool: PgPool,
}

impl PostgresIndex {
    /// Connect to the database at `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err("Connection"))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_metadata_types(&self) -> Result<Vec<Arc<MetadataType>>> {
        let rows = sqlx::query_scalar::<_, Value>(
            "SELECT definition FROM metadata_type ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query"))?;

        rows.iter()
            .map(|doc| MetadataType::from_doc(doc).map(Arc::new))
            .collect()
    }

    async fn load_products(&self, name: Option<&str>) -> Result<Vec<Arc<Product>>> {
        let rows = sqlx::query_scalar::<_, Value>(
            "SELECT definition FROM product \
             WHERE $1::TEXT IS NULL OR name = $1 ORDER BY name",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query"))?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let types = self.load_metadata_types().await?;
        rows.iter()
            .map(|doc| {
                Product::from_doc(doc, |t| types.iter().find(|m| m.name == t).cloned())
                    .map(Arc::new)
            })
            .collect()
    }

    /// Attach locations and lineage to a page of dataset rows.
    async fn hydrate(&self, rows: Vec<DatasetRow>) -> Result<Vec<DatasetRecord>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let locations = sqlx::query_as::<_, LocationRow>(
            "SELECT dataset_ref, uri FROM dataset_location \
             WHERE dataset_ref = ANY($1) AND archived IS NULL \
             ORDER BY added DESC, id DESC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query"))?;

        let sources = sqlx::query_as::<_, SourceRow>(
            "SELECT dataset_ref, classifier, source_dataset_ref FROM dataset_source \
             WHERE dataset_ref = ANY($1) ORDER BY classifier",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query"))?;

        let mut uris: HashMap<Uuid, Vec<String>> = HashMap::new();
        for loc in locations {
            uris.entry(loc.dataset_ref).or_default().push(loc.uri);
        }
        let mut lineage: HashMap<Uuid, Vec<LineageRef>> = HashMap::new();
        for src in sources {
            lineage.entry(src.dataset_ref).or_default().push(LineageRef {
                classifier: src.classifier,
                source_id: src.source_dataset_ref,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                let mut record = DatasetRecord::from(row);
                record.uris = uris.remove(&id).unwrap_or_default();
                record.sources = lineage.remove(&id).unwrap_or_default();
                record
            })
            .collect())
    }
}

#[async_trait]
impl IndexDriver for PostgresIndex {
    /// Run database migrations.
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err("Migration"))?;
            }
        }
        debug!("Index schema ready");
        Ok(())
    }

    async fn insert_metadata_type(&self, metadata_type: &MetadataType) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO metadata_type (name, definition, added) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&metadata_type.name)
        .bind(metadata_type.definition())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err("Insert"))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::AlreadyExists(format!(
                "metadata type '{}'",
                metadata_type.name
            )));
        }
        Ok(())
    }

    async fn update_metadata_type(&self, metadata_type: &MetadataType) -> Result<()> {
        let result = sqlx::query("UPDATE metadata_type SET definition = $2 WHERE name = $1")
            .bind(&metadata_type.name)
            .bind(metadata_type.definition())
            .execute(&self.pool)
            .await
            .map_err(db_err("Update"))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::not_found(format!(
                "metadata type '{}'",
                metadata_type.name
            )));
        }
        Ok(())
    }

    async fn get_metadata_type(&self, name: &str) -> Result<Option<Arc<MetadataType>>> {
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT definition FROM metadata_type WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Query"))?;

        row.map(|doc| MetadataType::from_doc(&doc).map(Arc::new))
            .transpose()
    }

    async fn list_metadata_types(&self) -> Result<Vec<Arc<MetadataType>>> {
        self.load_metadata_types().await
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO product (name, metadata_type, definition, added) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (name) DO NOTHING",
        )
        .bind(&product.name)
        .bind(&product.metadata_type.name)
        .bind(product.definition())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err("Insert"))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::AlreadyExists(format!("product '{}'", product.name)));
        }
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let result = sqlx::query(
            "UPDATE product SET metadata_type = $2, definition = $3 WHERE name = $1",
        )
        .bind(&product.name)
        .bind(&product.metadata_type.name)
        .bind(product.definition())
        .execute(&self.pool)
        .await
        .map_err(db_err("Update"))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::not_found(format!("product '{}'", product.name)));
        }
        Ok(())
    }

    async fn delete_product(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM product WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_err("Delete"))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::not_found(format!("product '{}'", name)));
        }
        Ok(())
    }

    async fn get_product(&self, name: &str) -> Result<Option<Arc<Product>>> {
        Ok(self.load_products(Some(name)).await?.into_iter().next())
    }

    async fn list_products(&self) -> Result<Vec<Arc<Product>>> {
        self.load_products(None).await
    }

    async fn count_product_datasets(&self, name: &str) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM dataset WHERE product = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Query"))?;

        Ok(count as u64)
    }

    async fn product_time_bounds(&self, name: &str) -> Result<Option<TimeRange>> {
        let (lo, hi) = sqlx::query_as::<_, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)>(
            "SELECT MIN(time_lo), MAX(time_hi) FROM dataset \
             WHERE product = $1 AND archived IS NULL",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Query"))?;

        Ok(lo.zip(hi).map(|(lo, hi)| TimeRange::new(lo, hi)))
    }

    async fn insert_dataset(&self, record: &DatasetRecord, with_lineage: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err("Transaction"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO dataset (
                id, product, metadata,
                time_lo, time_hi,
                lon_min, lat_min, lon_max, lat_max,
                added
            ) VALUES (
                $1, $2, $3,
                $4, $5,
                $6, $7, $8, $9,
                $10
            )
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.product)
        .bind(&record.metadata)
        .bind(record.time.map(|t| t.start))
        .bind(record.time.map(|t| t.end))
        .bind(record.bounds.map(|b| b.min_x))
        .bind(record.bounds.map(|b| b.min_y))
        .bind(record.bounds.map(|b| b.max_x))
        .bind(record.bounds.map(|b| b.max_y))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db_err("Insert"))?
        .rows_affected()
            == 1;

        // Oldest first so the newest location gets the highest id.
        for uri in record.uris.iter().rev() {
            sqlx::query(
                "INSERT INTO dataset_location (dataset_ref, uri, added) VALUES ($1, $2, $3) \
                 ON CONFLICT (dataset_ref, uri) DO NOTHING",
            )
            .bind(record.id)
            .bind(uri)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(db_err("Insert"))?;
        }

        if inserted && with_lineage {
            for source in &record.sources {
                sqlx::query(
                    "INSERT INTO dataset_source (dataset_ref, classifier, source_dataset_ref) \
                     VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                )
                .bind(record.id)
                .bind(&source.classifier)
                .bind(source.source_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err("Insert"))?;
            }
        }

        tx.commit().await.map_err(db_err("Commit"))?;
        Ok(inserted)
    }

    async fn get_dataset(&self, id: Uuid) -> Result<Option<DatasetRecord>> {
        let row = sqlx::query_as::<_, DatasetRow>(&format!(
            "SELECT {} FROM dataset WHERE id = $1",
            DATASET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Query"))?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn datasets_exist(&self, ids: &[Uuid]) -> Result<Vec<bool>> {
        let found = sqlx::query_scalar::<_, Uuid>("SELECT id FROM dataset WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Query"))?;

        Ok(ids.iter().map(|id| found.contains(id)).collect())
    }

    async fn set_archived(&self, ids: &[Uuid], time: Option<DateTime<Utc>>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE dataset SET archived = $2 \
             WHERE id = ANY($1) AND (archived IS NULL) = ($2::TIMESTAMPTZ IS NOT NULL)",
        )
        .bind(ids)
        .bind(time)
        .execute(&self.pool)
        .await
        .map_err(db_err("Update"))?;

        Ok(result.rows_affected())
    }

    async fn derived_ids(&self, id: Uuid) -> Result<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT dataset_ref FROM dataset_source WHERE source_dataset_ref = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query"))
    }

    async fn candidates(&self, filter: &CandidateFilter) -> Result<Vec<DatasetRecord>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM dataset WHERE product = ANY(",
            DATASET_COLUMNS
        ));
        qb.push_bind(filter.products.clone()).push(")");

        if !filter.include_archived {
            qb.push(" AND archived IS NULL");
        }
        if let Some(time) = &filter.time {
            qb.push(" AND (time_lo IS NULL OR (time_lo <= ")
                .push_bind(time.end)
                .push(" AND time_hi >= ")
                .push_bind(time.start)
                .push("))");
        }
        if let Some(bounds) = &filter.bounds {
            qb.push(" AND (lon_min IS NULL OR (lon_min <= ")
                .push_bind(bounds.max_x)
                .push(" AND lon_max >= ")
                .push_bind(bounds.min_x)
                .push(" AND lat_min <= ")
                .push_bind(bounds.max_y)
                .push(" AND lat_max >= ")
                .push_bind(bounds.min_y)
                .push("))");
        }
        qb.push(" ORDER BY seq");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        qb.push(" OFFSET ").push_bind(filter.offset as i64);

        let rows = qb
            .build_query_as::<DatasetRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Query"))?;

        self.hydrate(rows).await
    }

    async fn insert_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO dataset_location (dataset_ref, uri, added) \
             SELECT $1, $2, $3 WHERE EXISTS (SELECT 1 FROM dataset WHERE id = $1) \
             ON CONFLICT (dataset_ref, uri) DO NOTHING",
        )
        .bind(id)
        .bind(uri)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err("Insert"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_location(&self, id: Uuid, uri: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM dataset_location WHERE dataset_ref = $1 AND uri = $2")
                .bind(id)
                .bind(uri)
                .execute(&self.pool)
                .await
                .map_err(db_err("Delete"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_location_archived(
        &self,
        id: Uuid,
        uri: &str,
        time: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dataset_location SET archived = $3 \
             WHERE dataset_ref = $1 AND uri = $2 \
             AND (archived IS NULL) = ($3::TIMESTAMPTZ IS NOT NULL)",
        )
        .bind(id)
        .bind(uri)
        .bind(time)
        .execute(&self.pool)
        .await
        .map_err(db_err("Update"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn locations(&self, id: Uuid, archived: bool) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT uri FROM dataset_location \
             WHERE dataset_ref = $1 AND (archived IS NOT NULL) = $2 \
             ORDER BY added DESC, id DESC",
        )
        .bind(id)
        .bind(archived)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Query"))
    }
}

const DATASET_COLUMNS: &str = "id, product, metadata, added, archived, \
     time_lo, time_hi, lon_min, lat_min, lon_max, lat_max";

/// Internal row type for dataset queries.
#[derive(FromRow)]
struct DatasetRow {
    id: Uuid,
    product: String,
    metadata: Value,
    added: DateTime<Utc>,
    archived: Option<DateTime<Utc>>,
    time_lo: Option<DateTime<Utc>>,
    time_hi: Option<DateTime<Utc>>,
    lon_min: Option<f64>,
    lat_min: Option<f64>,
    lon_max: Option<f64>,
    lat_max: Option<f64>,
}

impl From<DatasetRow> for DatasetRecord {
    fn from(row: DatasetRow) -> Self {
        let bounds = match (row.lon_min, row.lat_min, row.lon_max, row.lat_max) {
            (Some(a), Some(b), Some(c), Some(d)) => Some(BoundingBox::new(a, b, c, d)),
            _ => None,
        };
        DatasetRecord {
            id: row.id,
            product: row.product,
            metadata: row.metadata,
            uris: Vec::new(),
            indexed_time: Some(row.added),
            archived_time: row.archived,
            sources: Vec::new(),
            time: row
                .time_lo
                .zip(row.time_hi)
                .map(|(lo, hi)| TimeRange::new(lo, hi)),
            bounds,
        }
    }
}

#[derive(FromRow)]
struct LocationRow {
    dataset_ref: Uuid,
    uri: String,
}

#[derive(FromRow)]
struct SourceRow {
    dataset_ref: Uuid,
    classifier: String,
    source_dataset_ref: Uuid,
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS metadata_type (
    name VARCHAR(100) PRIMARY KEY,
    definition JSONB NOT NULL,
    added TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS product (
    name VARCHAR(100) PRIMARY KEY,
    metadata_type VARCHAR(100) NOT NULL REFERENCES metadata_type(name),
    definition JSONB NOT NULL,
    added TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS dataset (
    seq BIGSERIAL UNIQUE,
    id UUID PRIMARY KEY,
    product VARCHAR(100) NOT NULL REFERENCES product(name),
    metadata JSONB NOT NULL,
    time_lo TIMESTAMPTZ,
    time_hi TIMESTAMPTZ,
    lon_min DOUBLE PRECISION,
    lat_min DOUBLE PRECISION,
    lon_max DOUBLE PRECISION,
    lat_max DOUBLE PRECISION,
    added TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    archived TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_dataset_product ON dataset(product);
CREATE INDEX IF NOT EXISTS idx_dataset_time ON dataset(time_lo, time_hi);
CREATE INDEX IF NOT EXISTS idx_dataset_bounds ON dataset(lon_min, lon_max, lat_min, lat_max);

CREATE TABLE IF NOT EXISTS dataset_location (
    id BIGSERIAL PRIMARY KEY,
    dataset_ref UUID NOT NULL REFERENCES dataset(id),
    uri TEXT NOT NULL,
    added TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    archived TIMESTAMPTZ,

    UNIQUE(dataset_ref, uri)
);

CREATE TABLE IF NOT EXISTS dataset_source (
    dataset_ref UUID NOT NULL REFERENCES dataset(id),
    classifier VARCHAR(100) NOT NULL,
    source_dataset_ref UUID NOT NULL,

    PRIMARY KEY (dataset_ref, classifier, source_dataset_ref)
);

CREATE INDEX IF NOT EXISTS idx_dataset_source_ref ON dataset_source(source_dataset_ref)
"#;
