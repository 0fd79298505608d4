// Index consistency validation
// Compares the schema vocabulary, the committed manifest and the stored vectors

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{IndexManifest, IndexPaths, IndexStore, RebuildReason};
use crate::schema::{SchemaDocument, extract};

/// Consistency check results for one schema index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Rows extracted from the current schema document
    pub schema_rows: usize,
    /// Rows recorded in the committed manifest
    pub manifest_rows: usize,
    /// Vectors stored for the committed generation
    pub stored_vectors: usize,
    /// Schema rows the index does not cover
    pub missing_in_index: Vec<String>,
    /// Indexed rows no longer present in the schema
    pub orphaned_in_index: Vec<String>,
    pub generation: Option<String>,
    pub model: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
    /// Set when the next `ensure_index` would rebuild
    pub rebuild_reason: Option<RebuildReason>,
    pub is_consistent: bool,
}

/// Validates one schema's index artifacts against the schema document
pub struct ConsistencyValidator<'a> {
    paths: &'a IndexPaths,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(paths: &'a IndexPaths) -> Self {
        Self { paths }
    }

    #[inline]
    pub async fn validate_consistency(
        &self,
        rebuild_reason: Option<RebuildReason>,
    ) -> Result<IndexReport> {
        info!(
            "Validating index consistency for {}",
            self.paths.schema.display()
        );

        let schema = SchemaDocument::load(&self.paths.schema).await?;
        let schema_rows: Vec<String> = extract(&schema).texts();
        debug!("Found {} rows in schema", schema_rows.len());

        let manifest = IndexManifest::read(&self.paths.rows).await.unwrap_or_else(|e| {
            warn!("{:#}", e);
            None
        });
        let manifest_rows: Vec<String> = manifest
            .as_ref()
            .map(|manifest| manifest.rows.texts())
            .unwrap_or_default();

        let stored_vectors = match &manifest {
            Some(manifest) => self.count_stored_vectors(&manifest.generation).await,
            None => 0,
        };

        let indexed: HashSet<&str> = manifest_rows.iter().map(String::as_str).collect();
        let current: HashSet<&str> = schema_rows.iter().map(String::as_str).collect();

        let missing_in_index: Vec<String> = schema_rows
            .iter()
            .filter(|row| !indexed.contains(row.as_str()))
            .cloned()
            .collect();
        let orphaned_in_index: Vec<String> = manifest_rows
            .iter()
            .filter(|row| !current.contains(row.as_str()))
            .cloned()
            .collect();

        let is_consistent = manifest.is_some()
            && missing_in_index.is_empty()
            && orphaned_in_index.is_empty()
            && stored_vectors == manifest_rows.len()
            && rebuild_reason.is_none();

        let report = IndexReport {
            schema_rows: schema_rows.len(),
            manifest_rows: manifest_rows.len(),
            stored_vectors,
            missing_in_index,
            orphaned_in_index,
            generation: manifest.as_ref().map(|m| m.generation.clone()),
            model: manifest.as_ref().map(|m| m.model.clone()),
            built_at: manifest.as_ref().map(|m| m.built_at),
            rebuild_reason,
            is_consistent,
        };

        if report.is_consistent {
            info!("Index consistency validation passed");
        } else {
            warn!("Index consistency validation found issues");
            Self::log_consistency_issues(&report);
        }

        Ok(report)
    }

    async fn count_stored_vectors(&self, generation: &str) -> usize {
        if !self.paths.index.exists() {
            return 0;
        }
        let store = match IndexStore::open(&self.paths.index).await {
            Ok(store) => store,
            Err(e) => {
                warn!("Failed to open vector index: {}", e);
                return 0;
            }
        };
        match store.has_generation(generation).await {
            Ok(true) => store.count_vectors(generation).await.unwrap_or_else(|e| {
                warn!("Failed to count stored vectors: {}", e);
                0
            }),
            Ok(false) => 0,
            Err(e) => {
                warn!("Failed to list index generations: {}", e);
                0
            }
        }
    }

    fn log_consistency_issues(report: &IndexReport) {
        if !report.missing_in_index.is_empty() {
            warn!(
                "Found {} schema rows missing from the index",
                report.missing_in_index.len()
            );
        }
        if !report.orphaned_in_index.is_empty() {
            warn!(
                "Found {} indexed rows no longer in the schema",
                report.orphaned_in_index.len()
            );
        }
        if report.stored_vectors != report.manifest_rows {
            warn!(
                "Manifest lists {} rows but {} vectors are stored",
                report.manifest_rows, report.stored_vectors
            );
        }
        if let Some(reason) = &report.rebuild_reason {
            warn!("Index needs a rebuild: {}", reason);
        }
    }
}

impl IndexReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} rows in schema, {} vectors stored",
                self.schema_rows, self.stored_vectors
            )
        } else if self.generation.is_none() {
            format!(
                "Index has not been built: {} rows in schema",
                self.schema_rows
            )
        } else {
            format!(
                "Index inconsistencies found: {} missing in index, {} orphaned in index, {} of {} vectors stored",
                self.missing_in_index.len(),
                self.orphaned_in_index.len(),
                self.stored_vectors,
                self.manifest_rows
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_index.len()
            + self.orphaned_in_index.len()
            + self.manifest_rows.abs_diff(self.stored_vectors)
    }
}
