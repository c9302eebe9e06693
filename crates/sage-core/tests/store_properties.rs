//! Property tests for the vector store and knowledge base.

use proptest::prelude::*;
use sage_core::types::euclidean_distance;
use sage_core::{FlatVectorStore, KnowledgeBase, Snippet};

const DIM: usize = 4;

fn vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-10.0f32..10.0, DIM)
}

proptest! {
    #[test]
    fn test_add_keeps_vectors_and_documents_aligned(
        texts in prop::collection::vec(".{0,40}", 0..20),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let mut kb = KnowledgeBase::in_memory(DIM);
            for (i, text) in texts.iter().enumerate() {
                let index = kb.add(&Snippet::new("prop", text.clone()), vec![i as f32; DIM]).await.unwrap();
                let stats = kb.stats();
                prop_assert_eq!(index, i);
                prop_assert_eq!(stats.vectors, stats.snippets);
                prop_assert_eq!(kb.document(i), Some(text.as_str()));
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_search_with_fewer_vectors_than_k(
        vectors in prop::collection::vec(vector(), 0..8),
        query in vector(),
        extra in 0usize..5,
    ) {
        let mut store = FlatVectorStore::new(DIM);
        for v in &vectors {
            store.add(v.clone()).unwrap();
        }

        let k = vectors.len() + extra;
        let results = store.search(&query, k).unwrap();
        prop_assert_eq!(results.len(), vectors.len());

        for pair in results.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_exact_match_ranks_first(
        vectors in prop::collection::vec(vector(), 1..10),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut store = FlatVectorStore::new(DIM);
        for v in &vectors {
            store.add(v.clone()).unwrap();
        }

        let target = pick.index(vectors.len());
        let results = store.search(&vectors[target], 1).unwrap();
        prop_assert_eq!(results.len(), 1);
        prop_assert_eq!(results[0].distance, 0.0);

        // Any earlier duplicate of the target wins the tie
        let first_equal = vectors
            .iter()
            .position(|v| euclidean_distance(v, &vectors[target]) == 0.0)
            .unwrap();
        prop_assert_eq!(results[0].index, first_equal);
    }
}
