#[cfg(test)]
mod tests;

use std::cmp::Ordering;

use crate::{Result, SliceError};

/// Exhaustive inner-product index over row vectors, one vector per row position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the row in the vocabulary
    pub position: usize,
    pub similarity: f32,
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    #[inline]
    pub fn with_capacity(dimension: usize, rows: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::with_capacity(dimension * rows),
        }
    }

    /// Build from row-ordered vectors, which must all share one dimension
    #[inline]
    pub fn from_vectors(vectors: &[Vec<f32>]) -> Result<Self> {
        let dimension = vectors.first().map_or(0, Vec::len);
        let mut index = Self::with_capacity(dimension, vectors.len());
        for vector in vectors {
            index.push(vector)?;
        }
        Ok(index)
    }

    #[inline]
    pub fn push(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension || self.dimension == 0 {
            return Err(SliceError::Index(format!(
                "Vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len().checked_div(self.dimension).unwrap_or(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// The `k` rows with the largest inner product against `query`, best first.
    /// Equal similarities are ordered by row position.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(SliceError::Index(format!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                similarity: dot(vector, query),
            })
            .collect();

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, by_similarity);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(by_similarity);

        Ok(neighbors)
    }
}

fn by_similarity(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then(a.position.cmp(&b.position))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
