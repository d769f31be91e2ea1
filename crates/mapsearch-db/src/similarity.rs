//! Similarity scoring and result ranking.
//!
//! Scores follow the pgvector convention `score = 1 - cosine_distance`, so
//! `1.0` is identical direction and `0.0` is orthogonal. Ranking always
//! applies the same three steps in order: drop hits below the cutoff, sort
//! by descending score with ties broken by ascending id, truncate to the
//! limit.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Default maximum number of hits returned by a similarity search.
pub const DEFAULT_SEARCH_LIMIT: usize = 3;

/// Default minimum score for a hit to be returned.
pub const DEFAULT_SIMILARITY_CUTOFF: f64 = 0.3;

/// Euclidean norm of a vector.
///
/// pgvector yields a NaN cosine distance when either side has zero norm.
pub fn magnitude(values: &[f32]) -> f64 {
    values
        .iter()
        .fold(0.0_f64, |acc, &v| f64::from(v).mul_add(f64::from(v), acc))
        .sqrt()
}

/// Apply cutoff, order and limit to scored hits.
///
/// Hits with a NaN score never pass the cutoff.
pub fn rank<T, K, F>(hits: Vec<(T, f64)>, key: F, cutoff: f64, limit: usize) -> Vec<(T, f64)>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut kept: Vec<(T, f64)> = hits
        .into_iter()
        .filter(|(_, score)| *score >= cutoff)
        .collect();
    kept.sort_by(|(a, sa), (b, sb)| match sb.total_cmp(sa) {
        Ordering::Equal => key(a).cmp(&key(b)),
        other => other,
    });
    kept.truncate(limit);
    kept
}

/// Keep only the best-scoring hit per key.
pub fn best_per_key<T, K, F>(hits: Vec<(T, f64)>, key: F) -> Vec<(T, f64)>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut best: BTreeMap<K, (T, f64)> = BTreeMap::new();
    for (item, score) in hits {
        let k = key(&item);
        match best.get(&k) {
            Some((_, existing)) if *existing >= score => {}
            _ => {
                best.insert(k, (item, score));
            }
        }
    }
    best.into_values().collect()
}
