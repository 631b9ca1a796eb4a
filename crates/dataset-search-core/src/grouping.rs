//! Document grouping and scoring.
//!
//! Turns a ranked list of chunk-level [`RetrievalHit`]s into at most one
//! [`GroupedResult`] per document.
//!
//! # Algorithm
//!
//! 1. Partition hits by `document_id`, keeping arrival order (groups are
//!    created in order of first appearance, members in arrival order).
//! 2. Join each group's contents with [`CHUNK_SEPARATOR`].
//! 3. Aggregate member scores with [`AggregationPolicy::Max`].
//! 4. Stable sort by aggregated score, descending. Ties keep first-arrival
//!    order, which makes the output deterministic for a fixed input.
//! 5. Truncate to `top_k`.

use std::collections::HashMap;

use crate::models::{GroupedResult, RetrievalHit};

/// Marker placed between merged chunks so provenance boundaries stay visible.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// How member scores are folded into a document score.
///
/// `Max` is the fixed policy: one highly relevant chunk is not diluted by
/// weaker siblings. `Mean` exists for comparison and evaluation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationPolicy {
    #[default]
    Max,
    Mean,
}

impl AggregationPolicy {
    /// NaN member scores are ignored. A group whose scores are all NaN
    /// aggregates to negative infinity and sorts last.
    fn aggregate(&self, scores: &[f64]) -> f64 {
        let valid: Vec<f64> = scores.iter().copied().filter(|s| !s.is_nan()).collect();
        if valid.is_empty() {
            return f64::NEG_INFINITY;
        }
        match self {
            AggregationPolicy::Max => valid.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregationPolicy::Mean => valid.iter().sum::<f64>() / valid.len() as f64,
        }
    }
}

/// Group hits by document using the default (max) aggregation.
pub fn group(hits: &[RetrievalHit], top_k: usize) -> Vec<GroupedResult> {
    group_with(hits, top_k, AggregationPolicy::default())
}

pub fn group_with(
    hits: &[RetrievalHit],
    top_k: usize,
    policy: AggregationPolicy,
) -> Vec<GroupedResult> {
    struct Pending<'a> {
        document_id: &'a str,
        title: Option<&'a str>,
        url: Option<&'a str>,
        contents: Vec<&'a str>,
        scores: Vec<f64>,
    }

    let mut order: Vec<Pending<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for hit in hits {
        let slot = *index.entry(hit.document_id.as_str()).or_insert_with(|| {
            order.push(Pending {
                document_id: &hit.document_id,
                title: None,
                url: None,
                contents: Vec::new(),
                scores: Vec::new(),
            });
            order.len() - 1
        });
        let pending = &mut order[slot];
        pending.contents.push(&hit.content);
        pending.scores.push(hit.score);
        if pending.title.is_none() {
            pending.title = hit.title.as_deref();
        }
        if pending.url.is_none() {
            pending.url = hit.url.as_deref();
        }
    }

    let mut grouped: Vec<GroupedResult> = order
        .into_iter()
        .map(|p| GroupedResult {
            id: p.document_id.to_string(),
            title: p.title.map(str::to_string),
            url: p.url.map(str::to_string),
            score: policy.aggregate(&p.scores),
            content: p.contents.join(CHUNK_SEPARATOR),
            chunks: p.contents.len(),
        })
        .collect();

    // sort_by is stable: equal scores keep first-arrival order
    grouped.sort_by(|a, b| b.score.total_cmp(&a.score));
    grouped.truncate(top_k);
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn hit(doc: &str, content: &str, score: f64) -> RetrievalHit {
        RetrievalHit {
            document_id: doc.to_string(),
            content: content.to_string(),
            score,
            title: None,
            url: None,
        }
    }

    #[test]
    fn test_example_scenario() {
        let hits = vec![hit("A", "a1", 0.9), hit("B", "b1", 0.7), hit("A", "a2", 0.95)];
        let out = group(&hits, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "A");
        assert!((out[0].score - 0.95).abs() < 1e-9);
        assert_eq!(out[0].chunks, 2);
        assert_eq!(out[1].id, "B");
        assert!((out[1].score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_empty_hits() {
        assert!(group(&[], 5).is_empty());
    }

    #[test]
    fn test_content_joined_in_arrival_order() {
        let hits = vec![
            hit("A", "first", 0.1),
            hit("B", "other", 0.5),
            hit("A", "second", 0.9),
            hit("A", "third", 0.2),
        ];
        let out = group(&hits, 10);
        let a = out.iter().find(|g| g.id == "A").unwrap();
        assert_eq!(
            a.content,
            format!("first{0}second{0}third", CHUNK_SEPARATOR)
        );
    }

    #[test]
    fn test_size_is_min_of_top_k_and_distinct_docs() {
        let hits = vec![
            hit("A", "x", 0.3),
            hit("B", "x", 0.2),
            hit("C", "x", 0.1),
            hit("B", "y", 0.25),
        ];
        for top_k in 0..6 {
            let out = group(&hits, top_k);
            assert_eq!(out.len(), top_k.min(3));
            let ids: HashSet<&str> = out.iter().map(|g| g.id.as_str()).collect();
            assert_eq!(ids.len(), out.len(), "duplicate document in output");
        }
    }

    #[test]
    fn test_descending_order() {
        let hits = vec![
            hit("low", "x", 0.1),
            hit("high", "x", 0.8),
            hit("mid", "x", 0.4),
        ];
        let out = group(&hits, 3);
        let ids: Vec<&str> = out.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let hits = vec![hit("B", "x", 0.5), hit("A", "x", 0.5), hit("C", "x", 0.5)];
        let out = group(&hits, 3);
        let ids: Vec<&str> = out.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_deterministic_and_idempotent() {
        let hits = vec![
            hit("A", "a", 0.4),
            hit("B", "b", 0.4),
            hit("C", "c", 0.9),
            hit("A", "a2", 0.1),
        ];
        let first = group(&hits, 2);
        let second = group(&hits, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_metadata_from_first_hit_carrying_it() {
        let mut h1 = hit("A", "x", 0.2);
        let mut h2 = hit("A", "y", 0.3);
        h2.title = Some("Dataset A".to_string());
        h2.url = Some("https://catalogue/a".to_string());
        h1.url = None;
        let out = group(&[h1, h2], 1);
        assert_eq!(out[0].title.as_deref(), Some("Dataset A"));
        assert_eq!(out[0].url.as_deref(), Some("https://catalogue/a"));
    }

    #[test]
    fn test_max_is_not_diluted() {
        let hits = vec![hit("A", "x", 0.9), hit("A", "y", 0.1), hit("B", "z", 0.6)];
        let max = group_with(&hits, 2, AggregationPolicy::Max);
        assert_eq!(max[0].id, "A");
        let mean = group_with(&hits, 2, AggregationPolicy::Mean);
        assert_eq!(mean[0].id, "B");
        assert!((mean[1].score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_nan_scores_ignored() {
        let hits = vec![
            hit("A", "x", f64::NAN),
            hit("A", "y", 0.3),
            hit("B", "z", f64::NAN),
            hit("C", "w", 0.1),
        ];
        let out = group(&hits, 3);
        let ids: Vec<&str> = out.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
        assert!((out[0].score - 0.3).abs() < 1e-9);
    }
}
