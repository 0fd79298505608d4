// Schema retriever
// Answers questions with the part of the schema they are about


pub mod scorer;
pub mod slice;
pub mod tokenize;

use std::sync::Arc;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::SliceError;
use crate::embeddings::Embedder;
use crate::index::{BuildOutcome, IndexBuilder, IndexPaths, LoadedIndex};
use crate::schema::SchemaDocument;

pub use scorer::{Candidate, RelevanceScorer, ScoreOutcome, ScoreTable};
pub use slice::{SliceSelection, assemble};
pub use tokenize::{RowTerms, stem, tokenize};

/// Scoring knobs, stored under `[retrieval]` in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Neighbors fetched for the whole-question embedding
    pub k_question: usize,
    /// Neighbors fetched for each token embedding
    pub k_token: usize,
    /// Maximum number of candidate rows
    pub top_k: usize,
    /// Rows must score at least this fraction of the best score
    pub tau: f32,
    pub exact_match_weight: f32,
    pub token_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_question: 15,
            k_token: 5,
            top_k: 50,
            tau: 0.18,
            exact_match_weight: 4.0,
            token_weight: 0.5,
        }
    }
}

/// The schema handed back for one question
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSlice {
    pub schema: SchemaDocument,
    /// Rows the slice was assembled from, best first
    pub candidates: Vec<Candidate>,
    /// Set when nothing was confidently relevant and the whole schema is returned
    pub full_schema: bool,
}

impl SchemaSlice {
    #[inline]
    pub fn full(schema: SchemaDocument) -> Self {
        Self {
            schema,
            candidates: Vec::new(),
            full_schema: true,
        }
    }

    #[inline]
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(self.schema.to_json_pretty()?)
    }
}

/// Everything a retrieval needs from one index generation
struct RetrievalState {
    schema: SchemaDocument,
    index: LoadedIndex,
    terms: RowTerms,
}

/// Owns the index of one schema document and serves slices from it.
///
/// The index is ensured and loaded on first use, then cached until
/// [`SchemaRetriever::invalidate`] or [`SchemaRetriever::reload`].
pub struct SchemaRetriever {
    builder: IndexBuilder,
    config: RetrievalConfig,
    state: RwLock<Option<Arc<RetrievalState>>>,
}

impl SchemaRetriever {
    #[inline]
    pub fn new(paths: IndexPaths, config: RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_builder(IndexBuilder::new(paths, embedder), config)
    }

    #[inline]
    pub fn with_builder(builder: IndexBuilder, config: RetrievalConfig) -> Self {
        Self {
            builder,
            config,
            state: RwLock::new(None),
        }
    }

    #[inline]
    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Drop the cached schema and index; the next retrieval loads them again
    #[inline]
    pub async fn invalidate(&self) {
        *self.state.write().await = None;
    }

    /// Ensure the index (rebuilding when stale or forced) and reload it.
    /// On failure the previously loaded index stays in use.
    #[inline]
    pub async fn reload(&self, force: bool) -> Result<BuildOutcome> {
        let outcome = self.builder.ensure_index(force).await?;
        let state = Arc::new(self.load_state().await?);
        *self.state.write().await = Some(state);
        Ok(outcome)
    }

    async fn state(&self) -> Result<Arc<RetrievalState>> {
        let cached = self.state.read().await.clone();
        if let Some(state) = cached {
            return Ok(state);
        }

        let mut guard = self.state.write().await;
        if let Some(state) = guard.as_ref() {
            return Ok(Arc::clone(state));
        }

        self.builder.ensure_index(false).await?;
        let state = Arc::new(self.load_state().await?);
        *guard = Some(Arc::clone(&state));
        Ok(state)
    }

    async fn load_state(&self) -> Result<RetrievalState> {
        let schema = SchemaDocument::load(&self.builder.paths().schema).await?;
        let index = self.builder.load().await?;
        let terms = RowTerms::new(index.rows());
        info!(
            "Loaded schema index generation {} ({} rows)",
            index.generation(),
            index.rows().len()
        );
        Ok(RetrievalState {
            schema,
            index,
            terms,
        })
    }

    /// Score every row of the vocabulary against `question`
    #[inline]
    pub async fn score(&self, question: &str) -> Result<ScoreOutcome> {
        let state = self.state().await?;
        self.score_with(&state, question).await
    }

    async fn score_with(&self, state: &RetrievalState, question: &str) -> Result<ScoreOutcome> {
        RelevanceScorer {
            config: &self.config,
            rows: state.index.rows(),
            terms: &state.terms,
            vectors: &state.index.vectors,
        }
        .score(question, self.builder.embedder().as_ref())
        .await
    }

    /// The schema slice relevant to `question`. Falls back to the full schema
    /// when no row scores above zero.
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<SchemaSlice> {
        let state = self.state().await?;

        let candidates = match self.score_with(&state, question).await? {
            ScoreOutcome::Candidates(candidates) => candidates,
            ScoreOutcome::NoConfidentCandidates => {
                debug!("No confident candidates, returning the full schema");
                return Ok(SchemaSlice::full(state.schema.clone()));
            }
        };

        let schema = assemble(&state.schema, candidates.iter().map(|c| &c.row));
        if schema.is_empty() {
            debug!("Candidates resolved to no schema types, returning the full schema");
            return Ok(SchemaSlice::full(state.schema.clone()));
        }

        debug!(
            "labels: [{}] relationships: [{}]",
            schema.node_types().iter().map(|n| &n.name).join(", "),
            schema.relationship_types().iter().map(|r| &r.name).join(", ")
        );

        Ok(SchemaSlice {
            schema,
            candidates,
            full_schema: false,
        })
    }

    /// Like [`SchemaRetriever::retrieve`], but an unreachable embedding service
    /// or an unusable index yields the full schema instead of an error.
    /// A missing or malformed schema document is still an error.
    #[inline]
    pub async fn retrieve_or_full(&self, question: &str) -> Result<SchemaSlice> {
        match self.retrieve(question).await {
            Ok(slice) => Ok(slice),
            Err(e) if is_recoverable(&e) => {
                warn!("Retrieval failed, returning the full schema: {:#}", e);
                Ok(SchemaSlice::full(self.full_schema().await?))
            }
            Err(e) => Err(e),
        }
    }

    /// The unabridged schema document, from the cache when loaded
    #[inline]
    pub async fn full_schema(&self) -> Result<SchemaDocument> {
        let cached = self.state.read().await.clone();
        if let Some(state) = cached {
            return Ok(state.schema.clone());
        }
        SchemaDocument::load(&self.builder.paths().schema)
            .await
            .context("Failed to load schema document")
    }
}

fn is_recoverable(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<SliceError>(),
        Some(SliceError::Embedding(_) | SliceError::Index(_))
    )
}
