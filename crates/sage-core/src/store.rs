//! Flat vector store with exact Euclidean nearest-neighbor search.
//!
//! Vectors are kept in insertion order and scanned linearly on every query,
//! O(n·d). That is the whole indexing strategy: there is no removal, no
//! re-indexing and no approximate search.

use crate::error::{Result, SageError};
use crate::types::{Neighbor, Vector, euclidean_distance};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FlatVectorStore {
    dimension: usize,
    vectors: Vec<Vector>,
}

impl FlatVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    /// Build a store from previously persisted vectors.
    pub fn from_vectors(dimension: usize, vectors: Vec<Vector>) -> Result<Self> {
        let mut store = Self::new(dimension);
        for vector in vectors {
            store.add(vector)?;
        }
        Ok(store)
    }

    fn validate_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(SageError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Append a vector and return its index.
    pub fn add(&mut self, vector: Vector) -> Result<usize> {
        self.validate_dimension(&vector)?;
        let index = self.vectors.len();
        self.vectors.push(vector);
        Ok(index)
    }

    /// Return up to `k` stored vectors nearest to `query`, nearest first.
    ///
    /// Equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.validate_dimension(query)?;

        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| Neighbor {
                index,
                distance: euclidean_distance(query, vector),
            })
            .collect();

        // sort_by is stable, which gives the insertion-order tie-break
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);

        debug!(
            "Flat search scanned {} vectors, returning {}",
            self.vectors.len(),
            neighbors.len()
        );
        Ok(neighbors)
    }

    pub fn get(&self, index: usize) -> Option<&[f32]> {
        self.vectors.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vectors(&self) -> &[Vector] {
        &self.vectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_vector(dimension: usize, seed: u64) -> Vector {
        let mut vec = Vec::with_capacity(dimension);
        for i in 0..dimension {
            vec.push(((seed + i as u64) % 100) as f32 / 100.0);
        }
        vec
    }

    #[test]
    fn test_insert_and_search() {
        let mut store = FlatVectorStore::new(128);

        let vec1 = create_test_vector(128, 1);
        let vec2 = create_test_vector(128, 50);

        assert_eq!(store.add(vec1.clone()).unwrap(), 0);
        assert_eq!(store.add(vec2).unwrap(), 1);
        assert_eq!(store.len(), 2);

        let results = store.search(&vec1, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 0);
        assert_relative_eq!(results[0].distance, 0.0, epsilon = 1e-6);
        assert!(results[1].distance > 0.0);
    }

    #[test]
    fn test_search_returns_all_when_fewer_than_k() {
        let mut store = FlatVectorStore::new(3);
        store.add(vec![1.0, 0.0, 0.0]).unwrap();
        store.add(vec![0.0, 5.0, 0.0]).unwrap();

        let results = store.search(&[0.0, 0.0, 0.0], 4).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 0);
        assert_relative_eq!(results[0].distance, 1.0, epsilon = 1e-6);
        assert_relative_eq!(results[1].distance, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_search_empty_store() {
        let store = FlatVectorStore::new(3);
        assert!(store.search(&[1.0, 2.0, 3.0], 4).unwrap().is_empty());
    }

    #[test]
    fn test_search_with_zero_k() {
        let mut store = FlatVectorStore::new(2);
        store.add(vec![1.0, 1.0]).unwrap();
        assert!(store.search(&[1.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut store = FlatVectorStore::new(2);
        store.add(vec![1.0, 0.0]).unwrap();
        store.add(vec![0.0, 1.0]).unwrap();
        store.add(vec![-1.0, 0.0]).unwrap();
        store.add(vec![1.0, 0.0]).unwrap();

        let results = store.search(&[0.0, 0.0], 4).unwrap();
        let order: Vec<usize> = results.iter().map(|n| n.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);

        // Duplicate exact match: the earlier insertion ranks first
        let results = store.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].index, 0);
        assert_eq!(results[1].index, 3);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut store = FlatVectorStore::new(128);

        let result = store.add(vec![0.0; 64]);
        match result.unwrap_err() {
            SageError::DimensionMismatch { expected, got } => {
                assert_eq!(expected, 128);
                assert_eq!(got, 64);
            }
            other => panic!("Expected DimensionMismatch error, got {other:?}"),
        }
        assert!(store.is_empty());

        assert!(matches!(
            store.search(&[0.0; 3], 1),
            Err(SageError::DimensionMismatch { expected: 128, got: 3 })
        ));
    }

    #[test]
    fn test_from_vectors_validates() {
        let store = FlatVectorStore::from_vectors(2, vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1), Some(&[3.0, 4.0][..]));
        assert!(store.get(2).is_none());

        assert!(FlatVectorStore::from_vectors(2, vec![vec![1.0]]).is_err());
    }
}
