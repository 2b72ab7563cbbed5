//! Rank fusion for hybrid search.
//!
//! Each source list contributes a positional score `(n - r) / n` for the
//! item at 0-based rank `r` in a list of `n`. The blended score is the
//! weighted sum of both contributions.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Positional score of rank `rank` in a list of `len` items.
pub fn positional_score(rank: usize, len: usize) -> f64 {
    if len == 0 || rank >= len {
        return 0.0;
    }
    (len - rank) as f64 / len as f64
}

/// Fuse two ranked lists, best first.
///
/// Items appearing in both lists get both contributions once. A duplicate
/// within one list keeps its first rank. Ties keep first appearance, vector
/// list before keyword list.
pub fn blend<K>(vector: &[K], keyword: &[K], vector_weight: f64, keyword_weight: f64) -> Vec<(K, f64)>
where
    K: Copy + Eq + Hash,
{
    let mut order: Vec<K> = Vec::with_capacity(vector.len() + keyword.len());
    let mut scores: HashMap<K, f64> = HashMap::new();

    for (list, weight) in [(vector, vector_weight), (keyword, keyword_weight)] {
        let mut seen = HashSet::new();
        for (rank, key) in list.iter().enumerate() {
            if !seen.insert(*key) {
                continue;
            }
            let contribution = weight * positional_score(rank, list.len());
            match scores.get_mut(key) {
                Some(score) => *score += contribution,
                None => {
                    scores.insert(*key, contribution);
                    order.push(*key);
                }
            }
        }
    }

    let mut fused: Vec<(K, f64)> = order
        .into_iter()
        .map(|key| (key, scores.get(&key).copied().unwrap_or(0.0)))
        .collect();
    // stable sort keeps first appearance among equal scores
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused
}

/// Concatenate two lists and drop later duplicates.
pub fn merge_unique<T, K>(first: Vec<T>, second: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T>
where
    K: Eq + Hash,
{
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(second)
        .filter(|item| seen.insert(key(item)))
        .collect()
}
