use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::storage::store::Store;

/// Iterative link-authority computation over the crawled link graph.
///
/// Runs as an explicitly triggered batch job: the whole rank vector is
/// computed in memory and persisted in one transaction after the final
/// iteration, so a mid-run failure leaves the previous scores untouched.
pub struct AuthorityEngine {
    store: Arc<Store>,
    damping: f64,
}

impl AuthorityEngine {
    pub fn new(store: Arc<Store>, damping: f64) -> Self {
        Self { store, damping }
    }

    pub async fn calculate(&self, iterations: u32) -> Result<()> {
        let page_ids = self.store.indexed_page_ids().await?;
        if page_ids.is_empty() {
            info!("No indexed pages, skipping authority computation");
            return Ok(());
        }

        let edges = self.store.indexed_link_edges().await?;
        info!(
            "Computing authority over {} pages, {} edges, {} iterations",
            page_ids.len(),
            edges.len(),
            iterations
        );

        let ranks = compute_ranks(&page_ids, &edges, iterations, self.damping);

        let scores: Vec<(i64, f64)> = ranks.into_iter().collect();
        self.store.persist_authority_scores(&scores).await?;

        info!("Persisted authority scores for {} pages", scores.len());
        Ok(())
    }
}

/// Fixed-iteration PageRank with a double-buffered rank vector.
///
/// `new(p) = (1 - d) + d * Σ old(src) / outdeg(src)` over incoming edges,
/// where `old` is always the previous iteration's snapshot. Dangling pages
/// keep their mass; it is not redistributed.
pub fn compute_ranks(
    page_ids: &[i64],
    edges: &[(i64, i64)],
    iterations: u32,
    damping: f64,
) -> HashMap<i64, f64> {
    let n = page_ids.len();
    if n == 0 {
        return HashMap::new();
    }

    let index: HashMap<i64, usize> = page_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i))
        .collect();

    let mut out_degree = vec![0usize; n];
    let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(from, to) in edges {
        let (from_idx, to_idx) = match (index.get(&from), index.get(&to)) {
            (Some(&f), Some(&t)) => (f, t),
            // Edge endpoints outside the indexed set are ignored
            _ => continue,
        };
        out_degree[from_idx] += 1;
        incoming[to_idx].push(from_idx);
    }

    let mut old_ranks = vec![1.0 / n as f64; n];
    let mut new_ranks = vec![0.0; n];

    for iteration in 1..=iterations {
        for (i, sources) in incoming.iter().enumerate() {
            let inbound: f64 = sources
                .iter()
                .map(|&src| old_ranks[src] / out_degree[src] as f64)
                .sum();
            new_ranks[i] = (1.0 - damping) + damping * inbound;
        }

        // Barrier: the new vector becomes the next iteration's snapshot
        std::mem::swap(&mut old_ranks, &mut new_ranks);
        debug!("Authority iteration {}/{} complete", iteration, iterations);
    }

    page_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, old_ranks[i]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAMPING: f64 = 0.85;

    #[test]
    fn test_zero_link_graph() {
        let pages = vec![1, 2, 3];
        let ranks = compute_ranks(&pages, &[], 1, DAMPING);

        for &id in &pages {
            assert!((ranks[&id] - (1.0 - DAMPING)).abs() < 1e-12);
        }

        // Further iterations change nothing without links
        let later = compute_ranks(&pages, &[], 10, DAMPING);
        for &id in &pages {
            assert!((ranks[&id] - later[&id]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_symmetric_two_node_graph() {
        let pages = vec![1, 2];
        let edges = vec![(1, 2), (2, 1)];

        for iterations in [1, 2, 5, 20] {
            let ranks = compute_ranks(&pages, &edges, iterations, DAMPING);
            assert!(
                (ranks[&1] - ranks[&2]).abs() < 1e-12,
                "asymmetric after {} iterations",
                iterations
            );
        }
    }

    #[test]
    fn test_inbound_links_raise_rank() {
        // 1 and 2 both point at 3
        let pages = vec![1, 2, 3];
        let edges = vec![(1, 3), (2, 3)];
        let ranks = compute_ranks(&pages, &edges, 10, DAMPING);

        assert!(ranks[&3] > ranks[&1]);
        assert!(ranks[&3] > ranks[&2]);
        assert!((ranks[&1] - ranks[&2]).abs() < 1e-12);
    }

    #[test]
    fn test_edges_outside_page_set_ignored() {
        let pages = vec![1, 2];
        let edges = vec![(1, 2), (1, 99), (99, 2)];
        let with_stray = compute_ranks(&pages, &edges, 5, DAMPING);

        let without = compute_ranks(&pages, &[(1, 2)], 5, DAMPING);
        assert!((with_stray[&1] - without[&1]).abs() < 1e-12);
        assert!((with_stray[&2] - without[&2]).abs() < 1e-12);
    }

    #[test]
    fn test_empty_graph() {
        assert!(compute_ranks(&[], &[], 5, DAMPING).is_empty());
    }
}
