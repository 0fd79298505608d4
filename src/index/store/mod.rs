
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection,
    query::{ExecutableQuery, QueryBase},
};
use tracing::{debug, info, warn};

use super::flat::FlatIndex;
use crate::schema::RowVocabulary;
use crate::{Result, SliceError};

const TABLE_PREFIX: &str = "rows_";

/// LanceDB database holding one table of row vectors per index generation
pub struct IndexStore {
    connection: Connection,
    path: PathBuf,
}

impl IndexStore {
    /// Open (creating if needed) the vector database at `path`
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        debug!("Opening LanceDB at path: {:?}", path);

        tokio::fs::create_dir_all(path).await.map_err(|e| {
            SliceError::Index(format!(
                "Failed to create vector index directory {}: {}",
                path.display(),
                e
            ))
        })?;

        let uri = path.to_string_lossy();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| SliceError::Index(format!("Failed to connect to LanceDB: {}", e)))?;

        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn table_name(generation: &str) -> String {
        format!("{TABLE_PREFIX}{generation}")
    }

    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
        let size = i32::try_from(vector_dim).map_err(|_| {
            SliceError::Index(format!("Vector dimension {} is too large", vector_dim))
        })?;
        Ok(Arc::new(Schema::new(vec![
            Field::new("position", DataType::UInt32, false),
            Field::new("row", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    size,
                ),
                false,
            ),
        ])))
    }

    /// Write every row vector of one generation into a fresh table.
    /// An empty vocabulary writes nothing.
    #[inline]
    pub async fn write_generation(
        &self,
        generation: &str,
        rows: &RowVocabulary,
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if rows.len() != vectors.len() {
            return Err(SliceError::Index(format!(
                "Row count {} does not match vector count {}",
                rows.len(),
                vectors.len()
            )));
        }
        if rows.is_empty() {
            debug!("No rows to store for generation {}", generation);
            return Ok(());
        }

        let table_name = Self::table_name(generation);
        let record_batch = Self::create_record_batch(rows, vectors)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        self.connection
            .create_table(&table_name, reader)
            .execute()
            .await
            .map_err(|e| {
                SliceError::Index(format!("Failed to create table {}: {}", table_name, e))
            })?;

        info!(
            "Stored {} row vectors in table {}",
            vectors.len(),
            table_name
        );
        Ok(())
    }

    fn create_record_batch(rows: &RowVocabulary, vectors: &[Vec<f32>]) -> Result<RecordBatch> {
        let vector_dim = vectors.first().map_or(0, Vec::len);
        if vector_dim == 0 {
            return Err(SliceError::Index("Embeddings are empty".to_string()));
        }

        let mut positions = Vec::with_capacity(rows.len());
        let mut texts = Vec::with_capacity(rows.len());
        let mut flat_values = Vec::with_capacity(rows.len() * vector_dim);

        for (position, (row, vector)) in rows.iter().zip(vectors).enumerate() {
            if vector.len() != vector_dim {
                return Err(SliceError::Index(format!(
                    "Vector for row '{}' has dimension {}, expected {}",
                    row,
                    vector.len(),
                    vector_dim
                )));
            }
            let position = u32::try_from(position)
                .map_err(|_| SliceError::Index("Too many rows to index".to_string()))?;
            positions.push(position);
            texts.push(row.text());
            flat_values.extend_from_slice(vector);
        }

        let schema = Self::create_schema(vector_dim)?;
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let size = i32::try_from(vector_dim).map_err(|_| {
            SliceError::Index(format!("Vector dimension {} is too large", vector_dim))
        })?;
        let vector_array =
            FixedSizeListArray::try_new(field, size, Arc::new(Float32Array::from(flat_values)), None)
                .map_err(|e| {
                    SliceError::Index(format!("Failed to create vector array: {}", e))
                })?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(UInt32Array::from(positions)),
            Arc::new(StringArray::from(texts)),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| SliceError::Index(format!("Failed to create record batch: {}", e)))
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| SliceError::Index(format!("Failed to list tables: {}", e)))
    }

    #[inline]
    pub async fn has_generation(&self, generation: &str) -> Result<bool> {
        let table_name = Self::table_name(generation);
        Ok(self.table_names().await?.contains(&table_name))
    }

    /// Generations currently present in the database
    #[inline]
    pub async fn generations(&self) -> Result<Vec<String>> {
        Ok(self
            .table_names()
            .await?
            .into_iter()
            .filter_map(|name| name.strip_prefix(TABLE_PREFIX).map(str::to_string))
            .collect())
    }

    #[inline]
    pub async fn count_vectors(&self, generation: &str) -> Result<usize> {
        let table_name = Self::table_name(generation);
        let table = self
            .connection
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| SliceError::Index(format!("Failed to open table {}: {}", table_name, e)))?;

        table
            .count_rows(None)
            .await
            .map_err(|e| SliceError::Index(format!("Failed to count rows: {}", e)))
    }

    /// Read a whole generation back into memory, ordered by row position
    #[inline]
    pub async fn load_generation(
        &self,
        generation: &str,
        row_count: usize,
        dimension: usize,
    ) -> Result<FlatIndex> {
        if row_count == 0 {
            return Ok(FlatIndex::new(dimension));
        }

        let table_name = Self::table_name(generation);
        let table = self
            .connection
            .open_table(&table_name)
            .execute()
            .await
            .map_err(|e| SliceError::Index(format!("Failed to open table {}: {}", table_name, e)))?;

        let mut results = table
            .query()
            .limit(row_count)
            .execute()
            .await
            .map_err(|e| SliceError::Index(format!("Failed to query table: {}", e)))?;

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; row_count];
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| SliceError::Index(format!("Failed to read result stream: {}", e)))?
        {
            Self::parse_batch(&batch, dimension, &mut slots)?;
        }

        let mut index = FlatIndex::with_capacity(dimension, row_count);
        for (position, slot) in slots.into_iter().enumerate() {
            let vector = slot.ok_or_else(|| {
                SliceError::Index(format!(
                    "Table {} has no vector for row position {}",
                    table_name, position
                ))
            })?;
            index.push(&vector)?;
        }

        debug!("Loaded {} row vectors from {}", index.len(), table_name);
        Ok(index)
    }

    fn parse_batch(
        batch: &RecordBatch,
        dimension: usize,
        slots: &mut [Option<Vec<f32>>],
    ) -> Result<()> {
        let positions = batch
            .column_by_name("position")
            .ok_or_else(|| SliceError::Index("Missing position column".to_string()))?
            .as_any()
            .downcast_ref::<UInt32Array>()
            .ok_or_else(|| SliceError::Index("Invalid position column type".to_string()))?;

        let vectors = batch
            .column_by_name("vector")
            .ok_or_else(|| SliceError::Index("Missing vector column".to_string()))?
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| SliceError::Index("Invalid vector column type".to_string()))?;

        for row in 0..batch.num_rows() {
            let position = usize::try_from(positions.value(row))
                .map_err(|_| SliceError::Index("Row position out of range".to_string()))?;
            let values = vectors.value(row);
            let values = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| SliceError::Index("Invalid vector value type".to_string()))?;

            if values.len() != dimension {
                return Err(SliceError::Index(format!(
                    "Stored vector has dimension {}, expected {}",
                    values.len(),
                    dimension
                )));
            }

            let slot = slots.get_mut(position).ok_or_else(|| {
                SliceError::Index(format!("Row position {} out of range", position))
            })?;
            *slot = Some(values.values().to_vec());
        }
        Ok(())
    }

    /// Drop every generation table not named in `keep`; returns how many were dropped.
    /// Tables written less than `min_age` ago may belong to a build that has not
    /// committed yet and are left alone.
    #[inline]
    pub async fn prune(&self, keep: &[&str], min_age: Duration) -> Result<usize> {
        let mut dropped = 0;
        for generation in self.generations().await? {
            if keep.contains(&generation.as_str()) {
                continue;
            }
            let table_name = Self::table_name(&generation);
            match self.table_age(&table_name).await {
                Some(age) if age >= min_age => {}
                Some(_) => {
                    debug!("Keeping recently written table {}", table_name);
                    continue;
                }
                None => {
                    debug!("Keeping table {} of unknown age", table_name);
                    continue;
                }
            }
            match self.connection.drop_table(&table_name).await {
                Ok(()) => {
                    debug!("Dropped superseded table {}", table_name);
                    dropped += 1;
                }
                Err(e) => warn!("Failed to drop table {}: {}", table_name, e),
            }
        }
        Ok(dropped)
    }

    /// Time since the table's directory was last modified
    async fn table_age(&self, table_name: &str) -> Option<Duration> {
        let metadata = tokio::fs::metadata(self.path.join(format!("{table_name}.lance")))
            .await
            .ok()?;
        let modified = metadata.modified().ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default(),
        )
    }
}
