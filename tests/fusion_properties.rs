//! Property tests for rank fusion, BM25 ordering and the embedding cache

use hybrid_retrieval::{
    config::{Bm25Config, CacheConfig},
    embedding::{EmbeddingCache, EmbeddingParams, HashEmbeddingProvider},
    retrieval::{
        min_max_normalize, reciprocal_rank_fusion, rrf_contribution, weighted_score_fusion, Bm25Index,
        FusionCandidate, DEFAULT_RRF_K,
    },
    text::Tokenizer,
    types::RetrievalMethod,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn ranked_list() -> impl Strategy<Value = Vec<(String, f32)>> {
    // small id alphabet so lists overlap and repeat ids
    prop::collection::vec(("[a-h]", 0.0f32..10.0), 0..12)
}

fn candidates(list: &[(String, f32)], method: RetrievalMethod) -> Vec<FusionCandidate> {
    list.iter()
        .map(|(id, score)| FusionCandidate::new(id.clone(), *score, method))
        .collect()
}

fn distinct_ids(lists: &[&[(String, f32)]]) -> HashSet<String> {
    lists.iter().flat_map(|l| l.iter().map(|(id, _)| id.clone())).collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #[test]
    fn rrf_output_is_unique_and_complete(vector in ranked_list(), bm25 in ranked_list()) {
        let lists = vec![
            candidates(&vector, RetrievalMethod::Vector),
            candidates(&bm25, RetrievalMethod::Bm25),
        ];
        let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_K, None);

        let ids: Vec<&str> = fused.iter().map(|r| r.document_id.as_str()).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        prop_assert_eq!(unique.len(), ids.len());

        let expected = distinct_ids(&[vector.as_slice(), bm25.as_slice()]);
        let got: HashSet<String> = ids.iter().map(|s| s.to_string()).collect();
        prop_assert_eq!(got, expected);

        prop_assert!(fused.windows(2).all(|w| w[0].combined_score >= w[1].combined_score));
    }

    #[test]
    fn weighted_output_is_unique_and_complete(
        vector in ranked_list(),
        bm25 in ranked_list(),
        wv in 0.0f32..1.0,
        wb in 0.0f32..1.0,
    ) {
        let lists = vec![
            candidates(&vector, RetrievalMethod::Vector),
            candidates(&bm25, RetrievalMethod::Bm25),
        ];
        let fused = weighted_score_fusion(&lists, &[wv, wb], None).unwrap();

        let ids: HashSet<String> = fused.iter().map(|r| r.document_id.clone()).collect();
        prop_assert_eq!(ids.len(), fused.len());
        prop_assert_eq!(ids, distinct_ids(&[vector.as_slice(), bm25.as_slice()]));
    }

    #[test]
    fn rrf_contribution_decreases_with_rank(k in 1usize..200, rank in 1usize..500, gap in 1usize..50) {
        prop_assert!(rrf_contribution(k, rank) > rrf_contribution(k, rank + gap));
    }

    #[test]
    fn single_list_weighted_matches_normalized_order(list in ranked_list()) {
        let fused = weighted_score_fusion(&[candidates(&list, RetrievalMethod::Vector)], &[1.0], None).unwrap();

        // first occurrence of each id, in list order
        let mut seen = HashSet::new();
        let unique: Vec<(String, f32)> = list
            .iter()
            .filter(|(id, _)| seen.insert(id.clone()))
            .cloned()
            .collect();
        let normalized = min_max_normalize(&unique.iter().map(|(_, s)| *s).collect::<Vec<_>>());
        let mut expected: Vec<(String, f32)> = unique.into_iter().map(|(id, _)| id).zip(normalized).collect();
        expected.sort_by(|a, b| b.1.total_cmp(&a.1));

        let got: Vec<&str> = fused.iter().map(|r| r.document_id.as_str()).collect();
        let want: Vec<&str> = expected.iter().map(|(id, _)| id.as_str()).collect();
        prop_assert_eq!(got, want);
        for (result, (_, score)) in fused.iter().zip(&expected) {
            prop_assert!((result.combined_score - score).abs() < 1e-6);
        }
    }

    #[test]
    fn bm25_scores_are_positive_and_sorted(
        docs in prop::collection::vec("(alpha|beta|gamma|delta)( (alpha|beta|gamma|delta|omega)){0,8}", 1..15),
        query in "(alpha|beta|gamma)( (alpha|beta|gamma)){0,2}",
    ) {
        runtime().block_on(async {
            let index = Bm25Index::new(Arc::new(Tokenizer::new()), &Bm25Config::default());
            for (i, text) in docs.iter().enumerate() {
                index.add(&format!("d{:02}", i), text).await.unwrap();
            }
            let hits = index.search(&query, docs.len());
            prop_assert!(hits.iter().all(|h| h.score > 0.0));
            prop_assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

            // a newly added document holding a query term is ranked
            let term = query.split_whitespace().next().unwrap_or("alpha").to_string();
            index.add("zz-new", &term).await.unwrap();
            let hits = index.search(&query, docs.len() + 1);
            prop_assert!(hits.iter().any(|h| h.id == "zz-new"));
            Ok(())
        })?;
    }

    #[test]
    fn cache_never_exceeds_capacity(
        texts in prop::collection::vec("[a-z]{1,6}", 1..60),
        max_size in 1usize..16,
    ) {
        runtime().block_on(async {
            let config = CacheConfig { max_size, ..Default::default() };
            let cache = EmbeddingCache::new(Arc::new(HashEmbeddingProvider::new(16)), &config);
            for chunk in texts.chunks(7) {
                let batch: Vec<String> = chunk.to_vec();
                let vectors = cache.embed(&batch, &EmbeddingParams::new(), true).await.unwrap();
                prop_assert_eq!(vectors.len(), batch.len());
                prop_assert!(cache.stats().size <= max_size);
            }
            Ok(())
        })?;
    }
}
