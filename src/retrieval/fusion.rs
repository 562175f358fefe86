//! Result fusion strategies
//!
//! Combines ranked lists from several retrieval methods into one list.
//! Both strategies deduplicate by `document_id` and break score ties by
//! first-seen order: lists are visited in input order, each list top to
//! bottom, and the final sort is stable.

use crate::error::{Result, RetrievalError};
use crate::types::{Metadata, RetrievalMethod};
use std::collections::HashMap;

/// Default RRF smoothing constant
pub const DEFAULT_RRF_K: usize = 60;

/// One entry of a ranked input list. Position in the list is its rank.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionCandidate {
    pub document_id: String,
    pub score: f32,
    pub metadata: Metadata,
    pub method: RetrievalMethod,
}

impl FusionCandidate {
    pub fn new(document_id: impl Into<String>, score: f32, method: RetrievalMethod) -> Self {
        Self {
            document_id: document_id.into(),
            score,
            metadata: Metadata::new(),
            method,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Fused result after combining multiple ranking sources
#[derive(Debug, Clone, PartialEq)]
pub struct FusionResult {
    pub document_id: String,
    pub combined_score: f32,
    /// Union of source metadata; the first source carrying a field wins
    pub metadata: Metadata,
    /// Methods that returned this document, in first-seen order
    pub sources: Vec<RetrievalMethod>,
    /// 1-based rank of the document in each source list
    pub rank_per_method: HashMap<RetrievalMethod, usize>,
}

/// Insertion-ordered accumulator keyed by document id
#[derive(Default)]
struct Accumulator {
    results: Vec<FusionResult>,
    index: HashMap<String, usize>,
}

impl Accumulator {
    fn add(&mut self, candidate: &FusionCandidate, rank: usize, contribution: f32) {
        let slot = match self.index.get(&candidate.document_id) {
            Some(&slot) => slot,
            None => {
                self.index
                    .insert(candidate.document_id.clone(), self.results.len());
                self.results.push(FusionResult {
                    document_id: candidate.document_id.clone(),
                    combined_score: 0.0,
                    metadata: Metadata::new(),
                    sources: Vec::new(),
                    rank_per_method: HashMap::new(),
                });
                self.results.len() - 1
            }
        };

        let result = &mut self.results[slot];
        result.combined_score += contribution;
        if !result.sources.contains(&candidate.method) {
            result.sources.push(candidate.method);
        }
        result.rank_per_method.entry(candidate.method).or_insert(rank);
        for (key, value) in &candidate.metadata {
            if !result.metadata.contains_key(key) {
                result.metadata.insert(key.clone(), value.clone());
            }
        }
    }

    fn finish(mut self, top_k: Option<usize>) -> Vec<FusionResult> {
        // stable: equal scores keep first-seen order
        self.results
            .sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        if let Some(k) = top_k {
            self.results.truncate(k);
        }
        self.results
    }
}

/// Iterate a list yielding `(rank, candidate)`, skipping repeats of a document
/// within the same list. Rank is the 1-based position of the first occurrence.
fn unique_ranked(list: &[FusionCandidate]) -> impl Iterator<Item = (usize, &FusionCandidate)> {
    let mut seen = std::collections::HashSet::new();
    list.iter()
        .enumerate()
        .filter(move |(_, c)| seen.insert(c.document_id.as_str()))
        .map(|(i, c)| (i + 1, c))
}

/// Contribution of a document at 1-based `rank`: `1 / (k + rank)`
pub fn rrf_contribution(k: usize, rank: usize) -> f32 {
    1.0 / (k as f32 + rank as f32)
}

/// Reciprocal Rank Fusion
///
/// RRF score = Σ 1/(k + rank_r(d)) over every list r containing d.
///
/// Works on ranks rather than scores, so lexical and vector scores never
/// need to be calibrated against each other.
pub fn reciprocal_rank_fusion(
    lists: &[Vec<FusionCandidate>],
    k: usize,
    top_k: Option<usize>,
) -> Vec<FusionResult> {
    let mut acc = Accumulator::default();
    for list in lists {
        for (rank, candidate) in unique_ranked(list) {
            acc.add(candidate, rank, rrf_contribution(k, rank));
        }
    }
    acc.finish(top_k)
}

/// Min-max normalize to `[0, 1]`. If all values are equal, every value maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    let range = max - min;
    scores
        .iter()
        .map(|&s| {
            if range > 0.0 && range.is_finite() {
                (s - min) / range
            } else {
                1.0
            }
        })
        .collect()
}

/// Weighted score fusion
///
/// Each list is min-max normalized, scaled by its weight, and summed per
/// document. `weights` must have one entry per list.
pub fn weighted_score_fusion(
    lists: &[Vec<FusionCandidate>],
    weights: &[f32],
    top_k: Option<usize>,
) -> Result<Vec<FusionResult>> {
    if lists.len() != weights.len() {
        return Err(RetrievalError::config(format!(
            "Weighted fusion needs one weight per list: got {} lists and {} weights",
            lists.len(),
            weights.len()
        )));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(RetrievalError::config(format!(
            "Fusion weights must be finite and non-negative, got {}",
            w
        )));
    }

    let mut acc = Accumulator::default();
    for (list, &weight) in lists.iter().zip(weights) {
        let unique: Vec<(usize, &FusionCandidate)> = unique_ranked(list).collect();
        let raw: Vec<f32> = unique.iter().map(|(_, c)| c.score).collect();
        let normalized = min_max_normalize(&raw);
        for ((rank, candidate), norm) in unique.into_iter().zip(normalized) {
            acc.add(candidate, rank, weight * norm);
        }
    }
    Ok(acc.finish(top_k))
}
