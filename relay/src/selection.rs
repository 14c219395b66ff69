//! Seed-holder sampling.

use baton_crypto::selection_score;
use baton_types::UserId;

/// Pick `count` distinct students from `eligible`.
///
/// Deterministic given the same seed: each candidate is scored with
/// [`selection_score`] and the lowest scores win. Callers must ensure
/// `count <= eligible.len()`; otherwise every candidate is returned.
pub fn select_students(seed: &[u8; 32], eligible: &[UserId], count: usize) -> Vec<UserId> {
    let mut scored: Vec<([u8; 32], &UserId)> = eligible
        .iter()
        .map(|id| (selection_score(seed, id.as_str()), id))
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored.truncate(count);
    scored.into_iter().map(|(_, id)| id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> Vec<UserId> {
        (0..n).map(|i| UserId::new(format!("s{i}"))).collect()
    }

    #[test]
    fn selection_is_deterministic() {
        let p = pool(10);
        assert_eq!(select_students(&[4; 32], &p, 3), select_students(&[4; 32], &p, 3));
    }

    #[test]
    fn selection_respects_count_and_is_distinct() {
        let picked = select_students(&[1; 32], &pool(20), 5);
        assert_eq!(picked.len(), 5);
        let mut sorted = picked.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 5);
    }

    #[test]
    fn different_seeds_usually_differ() {
        let p = pool(30);
        assert_ne!(select_students(&[1; 32], &p, 5), select_students(&[2; 32], &p, 5));
    }
}
