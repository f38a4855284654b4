//! LanceDB-backed vector collection for configuration fragments.
//!
//! Writers mutate the live table through [`Collection`]; readers only ever
//! see a [`CollectionSnapshot`], a table handle pinned to one committed
//! version, so a rebuild in flight never leaks into a query.

use crate::error::{DbError, Result};
use crate::memory::models::{Record, RetrievedFragment};

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type};
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::{CompactionOptions, OptimizeAction};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use std::sync::Arc;

const VECTOR_COLUMN: &str = "vector";

/// Stale ids are deleted in chunks to keep predicates a sane length.
const DELETE_CHUNK: usize = 256;

/// Handle to the on-disk database.
#[derive(Clone)]
pub struct VectorStore {
    connection: lancedb::Connection,
}

impl VectorStore {
    /// Open (creating if needed) the database directory at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| DbError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let uri = path.to_str().ok_or_else(|| DbError::Open {
            path: path.to_path_buf(),
            reason: "path is not valid UTF-8".to_string(),
        })?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| DbError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        tracing::debug!(path = %path.display(), "connected to vector store");
        Ok(Self { connection })
    }

    /// Open the named collection, creating it when absent.
    ///
    /// A collection whose vector width differs from `dimensions` (the
    /// embedding model changed) is dropped and recreated empty; the next build
    /// repopulates it. Any other failure to open an existing collection is
    /// returned as is, leaving the data on disk untouched.
    pub async fn get_or_create_collection(&self, name: &str, dimensions: usize) -> Result<Collection> {
        let width = i32::try_from(dimensions)
            .map_err(|_| DbError::LanceDb(format!("vector width {dimensions} is too large")))?;

        match self.connection.open_table(name).execute().await {
            Ok(table) => match stored_dimensions(&table).await? {
                Some(existing) if existing == dimensions => {
                    return Ok(self.collection(name, table, dimensions));
                }
                Some(existing) => {
                    tracing::warn!(
                        collection = name,
                        existing,
                        dimensions,
                        "embedding width changed, recreating collection"
                    );
                    self.drop_quietly(name).await;
                }
                None => {
                    tracing::warn!(collection = name, "collection has no vector column, recreating");
                    self.drop_quietly(name).await;
                }
            },
            Err(lancedb::Error::TableNotFound { .. }) => {
                tracing::debug!(collection = name, "collection not found, will create");
            }
            Err(error) => return Err(DbError::from(error).into()),
        }

        let table = match self.create_empty(name, width).await {
            Ok(table) => table,
            Err(error) => {
                // Not listed as a table yet its directory exists: leftovers of
                // an interrupted create. Clear them and start over.
                tracing::warn!(
                    collection = name,
                    %error,
                    "failed to create collection, attempting recovery from corrupted state"
                );
                self.drop_quietly(name).await;
                let table = self.create_empty(name, width).await?;
                tracing::info!(collection = name, "collection recovered, contents will be rebuilt");
                table
            }
        };

        Ok(self.collection(name, table, dimensions))
    }

    fn collection(&self, name: &str, table: lancedb::Table, dimensions: usize) -> Collection {
        Collection {
            connection: self.connection.clone(),
            name: name.to_string(),
            table,
            dimensions,
        }
    }

    async fn create_empty(&self, name: &str, width: i32) -> Result<lancedb::Table> {
        let schema = schema(width);
        let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), schema);

        self.connection
            .create_table(name, Box::new(batches))
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()).into())
    }

    async fn drop_quietly(&self, name: &str) {
        if let Err(error) = self.connection.drop_table(name, &[]).await {
            tracing::warn!(collection = name, %error, "drop_table failed, proceeding anyway");
        }
    }
}

/// Writable view of one collection.
#[derive(Clone)]
pub struct Collection {
    connection: lancedb::Connection,
    name: String,
    table: lancedb::Table,
    dimensions: usize,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Insert or replace every record, keyed by id.
    pub async fn upsert_all(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dimensions) {
            return Err(DbError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.vector.len(),
            }
            .into());
        }

        let width = self.dimensions as i32;
        let batch = to_record_batch(records, width)?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema(width)));

        let mut merge = self.table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(reader)
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        tracing::debug!(collection = %self.name, records = records.len(), "upserted records");
        Ok(())
    }

    /// Delete every record whose id is not in `keep`. Returns how many went.
    pub async fn retain_only(&self, keep: &HashSet<String>) -> Result<usize> {
        let stale: Vec<String> = self
            .list_ids()
            .await?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        for chunk in stale.chunks(DELETE_CHUNK) {
            let quoted = chunk
                .iter()
                .map(|id| format!("'{}'", id.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(", ");
            self.table
                .delete(&format!("id IN ({quoted})"))
                .await
                .map_err(|e| DbError::LanceDb(e.to_string()))?;
        }

        if !stale.is_empty() {
            tracing::debug!(collection = %self.name, removed = stale.len(), "removed stale records");
        }
        Ok(stale.len())
    }

    /// All record ids currently in the live table.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let results: Vec<RecordBatch> = self
            .table
            .query()
            .select(lancedb::query::Select::columns(&["id"]))
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let mut ids = Vec::new();
        for batch in results {
            if let Some(id_col) = batch.column_by_name("id") {
                let values: &StringArray = id_col.as_string::<i32>();
                for index in 0..values.len() {
                    if values.is_valid(index) {
                        ids.push(values.value(index).to_string());
                    }
                }
            }
        }
        Ok(ids)
    }

    pub async fn count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()).into())
    }

    /// Compact small data files, then delete versions superseded more than
    /// `prune_after` ago. The latest version is always kept.
    pub async fn optimize(&self, prune_after: Duration) -> Result<()> {
        let older_than = chrono::Duration::from_std(prune_after)
            .map_err(|e| DbError::LanceDb(format!("invalid prune age: {e}")))?;

        self.table
            .optimize(OptimizeAction::Compact {
                options: CompactionOptions::default(),
                remap_options: None,
            })
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let stats = self
            .table
            .optimize(OptimizeAction::Prune {
                older_than: Some(older_than),
                delete_unverified: Some(false),
                error_if_tagged_old_versions: Some(false),
            })
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        if let Some(prune) = stats.prune {
            tracing::debug!(
                collection = %self.name,
                old_versions = prune.old_versions,
                bytes_removed = prune.bytes_removed,
                "pruned old versions"
            );
        }
        Ok(())
    }

    /// Pin the current committed version as a read-only snapshot.
    ///
    /// The snapshot holds its own table handle checked out at that version,
    /// so later writes through this collection are invisible to it.
    pub async fn snapshot(&self) -> Result<CollectionSnapshot> {
        let version = self
            .table
            .version()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let pinned = self
            .connection
            .open_table(&self.name)
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;
        pinned
            .checkout(version)
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let records = pinned
            .count_rows(None)
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        Ok(CollectionSnapshot {
            table: pinned,
            version,
            dimensions: self.dimensions,
            records,
        })
    }
}

/// Immutable, version-pinned view used for retrieval.
pub struct CollectionSnapshot {
    table: lancedb::Table,
    version: u64,
    dimensions: usize,
    records: usize,
}

impl std::fmt::Debug for CollectionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSnapshot")
            .field("version", &self.version)
            .field("dimensions", &self.dimensions)
            .field("records", &self.records)
            .finish()
    }
}

impl CollectionSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of records at the pinned version.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// The `limit` records nearest to `vector` by cosine distance, closest
    /// first. Returns fewer when the snapshot holds fewer records.
    pub async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievedFragment>> {
        if vector.len() != self.dimensions {
            return Err(DbError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            }
            .into());
        }
        if limit == 0 || self.records == 0 {
            return Ok(Vec::new());
        }

        let results: Vec<RecordBatch> = self
            .table
            .query()
            .nearest_to(vector)
            .map_err(|e| DbError::LanceDb(e.to_string()))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| DbError::LanceDb(e.to_string()))?;

        let mut matches = Vec::new();
        for batch in results {
            if let (
                Some(id_col),
                Some(text_col),
                Some(path_col),
                Some(extension_col),
                Some(index_col),
                Some(dist_col),
            ) = (
                batch.column_by_name("id"),
                batch.column_by_name("text"),
                batch.column_by_name("path"),
                batch.column_by_name("extension"),
                batch.column_by_name("fragment_index"),
                batch.column_by_name("_distance"),
            ) {
                let ids: &StringArray = id_col.as_string::<i32>();
                let texts: &StringArray = text_col.as_string::<i32>();
                let paths: &StringArray = path_col.as_string::<i32>();
                let extensions: &StringArray = extension_col.as_string::<i32>();
                let indexes: &arrow_array::PrimitiveArray<Int32Type> = index_col.as_primitive();
                let dists: &arrow_array::PrimitiveArray<Float32Type> = dist_col.as_primitive();

                for i in 0..ids.len() {
                    if ids.is_valid(i) && dists.is_valid(i) {
                        matches.push(RetrievedFragment {
                            id: ids.value(i).to_string(),
                            text: texts.value(i).to_string(),
                            path: paths.value(i).to_string(),
                            extension: extensions.value(i).to_string(),
                            fragment_index: indexes.value(i).max(0) as usize,
                            distance: dists.value(i),
                        });
                    }
                }
            }
        }

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(limit);
        Ok(matches)
    }
}

/// Width of the vector column, or `None` when the table has no usable one.
async fn stored_dimensions(table: &lancedb::Table) -> Result<Option<usize>> {
    let schema = table.schema().await.map_err(DbError::from)?;
    let Ok(field) = schema.field_with_name(VECTOR_COLUMN) else {
        return Ok(None);
    };
    Ok(match field.data_type() {
        DataType::FixedSizeList(_, width) => usize::try_from(*width).ok(),
        _ => None,
    })
}

fn schema(width: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("extension", DataType::Utf8, false),
        Field::new("fragment_index", DataType::Int32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), width),
            false,
        ),
    ]))
}

fn to_record_batch(records: &[Record], width: i32) -> Result<RecordBatch> {
    let ids = StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()));
    let paths = StringArray::from_iter_values(records.iter().map(|r| r.metadata.path.as_str()));
    let extensions =
        StringArray::from_iter_values(records.iter().map(|r| r.metadata.extension.as_str()));
    let indexes = Int32Array::from_iter_values(
        records
            .iter()
            .map(|r| i32::try_from(r.metadata.fragment_index).unwrap_or(i32::MAX)),
    );
    let texts = StringArray::from_iter_values(records.iter().map(|r| r.text.as_str()));
    let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        records
            .iter()
            .map(|r| Some(r.vector.iter().map(|v| Some(*v)).collect::<Vec<_>>())),
        width,
    );

    let batch = RecordBatch::try_new(
        schema(width),
        vec![
            Arc::new(ids) as ArrayRef,
            Arc::new(paths) as ArrayRef,
            Arc::new(extensions) as ArrayRef,
            Arc::new(indexes) as ArrayRef,
            Arc::new(texts) as ArrayRef,
            Arc::new(vectors) as ArrayRef,
        ],
    )
    .map_err(DbError::from)?;
    Ok(batch)
}
