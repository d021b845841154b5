//! Maximal marginal relevance

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Pick up to `k` candidate indices trading relevance against redundancy
///
/// `lambda_mult` of 1 ranks purely by similarity to the query, 0 purely by
/// distance from what is already selected. The most similar candidate is
/// always picked first.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    lambda_mult: f32,
    k: usize,
) -> Vec<usize> {
    let limit = k.min(candidates.len());
    if limit == 0 {
        return Vec::new();
    }

    let to_query: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut best_first = 0;
    for (i, score) in to_query.iter().enumerate() {
        if *score > to_query[best_first] {
            best_first = i;
        }
    }
    let mut selected = vec![best_first];

    while selected.len() < limit {
        let mut best: Option<(usize, f32)> = None;
        for (i, query_score) in to_query.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let redundancy = selected
                .iter()
                .map(|&j| cosine_similarity(&candidates[i], &candidates[j]))
                .fold(f32::NEG_INFINITY, f32::max);
            let score = lambda_mult * query_score - (1.0 - lambda_mult) * redundancy;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        match best {
            Some((i, _)) => selected.push(i),
            None => break,
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_mmr_prefers_diverse_second_pick() {
        let query = [1.0, 0.5];
        let candidates = vec![
            vec![1.0, 0.1],  // most relevant
            vec![1.0, 0.09], // near duplicate of the first
            vec![0.0, 1.0],  // less relevant, different direction
        ];

        assert_eq!(
            maximal_marginal_relevance(&query, &candidates, 0.5, 2),
            vec![0, 2]
        );
        // Pure relevance keeps the near duplicate
        assert_eq!(
            maximal_marginal_relevance(&query, &candidates, 1.0, 2),
            vec![0, 1]
        );
    }

    #[test]
    fn test_mmr_limits() {
        let candidates = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(maximal_marginal_relevance(&[1.0, 0.0], &candidates, 0.5, 0).is_empty());
        assert!(maximal_marginal_relevance(&[1.0, 0.0], &[], 0.5, 3).is_empty());
        assert_eq!(
            maximal_marginal_relevance(&[1.0, 0.0], &candidates, 0.5, 5).len(),
            2
        );
    }
}
