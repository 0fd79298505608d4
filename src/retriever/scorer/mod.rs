// Relevance scorer
// Accumulates semantic and lexical evidence per row and keeps the confident ones


use std::cmp::Ordering;

use anyhow::Result;
use tracing::debug;

use super::RetrievalConfig;
use super::tokenize::{RowTerms, tokenize};
use crate::SliceError;
use crate::embeddings::{Embedder, normalized};
use crate::index::{FlatIndex, Neighbor};
use crate::schema::{Row, RowVocabulary};

/// A row selected for a question, with its accumulated score
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub position: usize,
    pub row: Row,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// Best first; equal scores keep vocabulary order
    Candidates(Vec<Candidate>),
    /// Nothing scored above zero
    NoConfidentCandidates,
}

/// Per-question score table indexed by row position
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    scores: Vec<f32>,
}

impl ScoreTable {
    #[inline]
    pub fn new(rows: usize) -> Self {
        Self {
            scores: vec![0.0; rows],
        }
    }

    /// Add `weight * similarity` for every neighbor with positive similarity
    #[inline]
    pub fn add_neighbors(&mut self, neighbors: &[Neighbor], weight: f32) {
        for neighbor in neighbors.iter().filter(|n| n.similarity > 0.0) {
            if let Some(score) = self.scores.get_mut(neighbor.position) {
                *score += weight * neighbor.similarity;
            }
        }
    }

    /// Add `weight` to every row having `token` among its stemmed sub-words
    #[inline]
    pub fn add_exact_matches(&mut self, terms: &RowTerms, token: &str, weight: f32) {
        for position in terms.matching(token) {
            if let Some(score) = self.scores.get_mut(position) {
                *score += weight;
            }
        }
    }

    #[inline]
    pub fn score(&self, position: usize) -> f32 {
        self.scores.get(position).copied().unwrap_or(0.0)
    }

    /// Keep rows scoring at least `tau` times the best score, capped at `top_k`
    #[inline]
    pub fn select(&self, rows: &RowVocabulary, tau: f32, top_k: usize) -> ScoreOutcome {
        let best = self.scores.iter().copied().fold(0.0_f32, f32::max);
        if best <= 0.0 {
            return ScoreOutcome::NoConfidentCandidates;
        }

        let threshold = best * tau;
        let mut selected: Vec<(usize, f32)> = self
            .scores
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, score)| score > 0.0 && score >= threshold)
            .collect();
        selected.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            ordering => ordering,
        });
        selected.truncate(top_k);

        let candidates = selected
            .into_iter()
            .filter_map(|(position, score)| {
                rows.get(position).map(|row| Candidate {
                    position,
                    row: row.clone(),
                    score,
                })
            })
            .collect();
        ScoreOutcome::Candidates(candidates)
    }
}

/// Scores one question against a loaded vocabulary and its vectors
pub struct RelevanceScorer<'a> {
    pub config: &'a RetrievalConfig,
    pub rows: &'a RowVocabulary,
    pub terms: &'a RowTerms,
    pub vectors: &'a FlatIndex,
}

impl RelevanceScorer<'_> {
    #[inline]
    pub async fn score(&self, question: &str, embedder: &dyn Embedder) -> Result<ScoreOutcome> {
        let tokens = tokenize(question);
        debug!("Question tokens: {:?}", tokens);

        let mut table = ScoreTable::new(self.rows.len());

        let mut texts = Vec::with_capacity(tokens.len() + 1);
        texts.push(question.to_string());
        texts.extend(tokens.iter().cloned());

        let embeddings = embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| SliceError::Embedding(format!("{:#}", e)))?;
        if embeddings.len() != texts.len() {
            return Err(SliceError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            ))
            .into());
        }
        let mut embeddings = embeddings.into_iter().map(normalized);

        if let Some(question_vector) = embeddings.next() {
            let neighbors = self
                .vectors
                .search(&question_vector, self.config.k_question)?;
            table.add_neighbors(&neighbors, 1.0);
        }

        for (token, token_vector) in tokens.iter().zip(embeddings) {
            let neighbors = self.vectors.search(&token_vector, self.config.k_token)?;
            table.add_neighbors(&neighbors, self.config.token_weight);
            table.add_exact_matches(self.terms, token, self.config.exact_match_weight);
        }

        Ok(table.select(self.rows, self.config.tau, self.config.top_k))
    }
}
