//! # Anchor selection
//!
//! The anchor of a target cell is the largest fully observed submatrix built from
//! rows observed in the target column and columns observed in the target row. The
//! search itself lives in [`crate::graph`]; this module narrows the candidates,
//! memoizes results, and partitions anchor rows into synthetic neighbors.

use crate::graph::{ObservationGraph, find_max_biclique_within};
use dashmap::DashMap;
use ndarray::{ArrayView2, Axis};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Expansion cap for a single anchor search. Past it the best biclique found so
/// far is used, so results stay deterministic for a given observation pattern.
pub const ANCHOR_SEARCH_BUDGET: usize = 1_000;

/// Donor rows and columns of a fully observed anchor submatrix, both sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorSet {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

impl AnchorSet {
    pub fn area(&self) -> usize {
        self.rows.len() * self.cols.len()
    }
}

/// Exact candidate sets plus the bit-packed missingness of their submatrix, so
/// one cache can serve matrices with different observation patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AnchorKey {
    rows: Vec<usize>,
    cols: Vec<usize>,
    missing: Vec<u64>,
}

impl AnchorKey {
    fn new(submatrix: ArrayView2<f64>, rows: Vec<usize>, cols: Vec<usize>) -> Self {
        let mut missing = vec![0u64; submatrix.len().div_ceil(64)];
        for (bit, value) in submatrix.iter().enumerate() {
            if value.is_nan() {
                missing[bit / 64] |= 1 << (bit % 64);
            }
        }
        Self {
            rows,
            cols,
            missing,
        }
    }
}

/// Concurrent memo of anchor searches, shared by every prediction of an estimator.
#[derive(Debug, Default)]
pub struct AnchorCache {
    entries: DashMap<AnchorKey, Option<AnchorSet>, ahash::RandomState>,
}

impl AnchorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every memoized search. Safe to call at any time.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn get_or_compute(
        &self,
        key: AnchorKey,
        compute: impl FnOnce() -> Option<AnchorSet>,
    ) -> Option<AnchorSet> {
        if let Some(hit) = self.entries.get(&key) {
            log::trace!(
                "Anchor cache hit for {} candidate rows x {} candidate columns",
                key.rows.len(),
                key.cols.len()
            );
            return hit.value().clone();
        }
        let anchors = compute();
        self.entries.insert(key, anchors.clone());
        anchors
    }
}

/// Candidate donors for `cell`: rows observed in its column and columns observed
/// in its row, excluding the target row and column themselves.
pub fn observed_support(matrix: ArrayView2<f64>, cell: (usize, usize)) -> (Vec<usize>, Vec<usize>) {
    let (target_row, target_col) = cell;
    let rows = matrix
        .column(target_col)
        .iter()
        .enumerate()
        .filter(|&(i, v)| i != target_row && !v.is_nan())
        .map(|(i, _)| i)
        .collect();
    let cols = matrix
        .row(target_row)
        .iter()
        .enumerate()
        .filter(|&(j, v)| j != target_col && !v.is_nan())
        .map(|(j, _)| j)
        .collect();
    (rows, cols)
}

/// Maximum-area fully observed submatrix over the candidate rows and columns.
///
/// Returns the candidates unchanged when their submatrix has no holes, and `None`
/// when either side is empty or no observed entry links them.
pub fn get_anchors(
    matrix: ArrayView2<f64>,
    rows: &[usize],
    cols: &[usize],
    cache: &AnchorCache,
) -> Option<AnchorSet> {
    let mut rows = rows.to_vec();
    rows.sort_unstable();
    rows.dedup();
    let mut cols = cols.to_vec();
    cols.sort_unstable();
    cols.dedup();
    if rows.is_empty() || cols.is_empty() {
        return None;
    }

    let submatrix = matrix.select(Axis(0), &rows).select(Axis(1), &cols);
    if !submatrix.iter().any(|v| v.is_nan()) {
        return Some(AnchorSet { rows, cols });
    }

    let key = AnchorKey::new(submatrix.view(), rows, cols);
    cache.get_or_compute(key.clone(), || {
        let graph = ObservationGraph::from_submatrix(&submatrix);
        let outcome = find_max_biclique_within(&graph, ANCHOR_SEARCH_BUDGET);
        if outcome.exhausted {
            log::debug!(
                "Anchor search over {} x {} candidates stopped after {} expansions",
                graph.n_rows(),
                graph.n_cols(),
                outcome.expansions
            );
        }
        outcome.best.map(|biclique| AnchorSet {
            rows: biclique.rows.iter().map(|&i| key.rows[i]).collect(),
            cols: biclique.cols.iter().map(|&j| key.cols[j]).collect(),
        })
    })
}

/// Anchor set for a single target cell.
pub fn find_anchors(
    matrix: ArrayView2<f64>,
    cell: (usize, usize),
    cache: &AnchorCache,
) -> Option<AnchorSet> {
    let (rows, cols) = observed_support(matrix, cell);
    get_anchors(matrix, &rows, &cols, cache)
}

/// Splits `seq` into `k` contiguous groups; the first `len % k` groups hold one
/// extra element. `k == 0` yields no groups.
pub fn split<T>(seq: &[T], k: usize) -> Vec<&[T]> {
    if k == 0 {
        return Vec::new();
    }
    let (q, r) = (seq.len() / k, seq.len() % k);
    (0..k)
        .map(|i| {
            let start = i * q + i.min(r);
            let len = q + usize::from(i < r);
            &seq[start..start + len]
        })
        .collect()
}

/// Partitions anchor rows into at most `n_neighbors` non-empty groups, shuffling
/// first when an RNG is given.
pub fn neighbor_groups(
    rows: &[usize],
    n_neighbors: usize,
    rng: Option<&mut ChaCha8Rng>,
) -> Vec<Vec<usize>> {
    let mut order = rows.to_vec();
    if let Some(rng) = rng {
        order.shuffle(rng);
    }
    split(&order, n_neighbors)
        .into_iter()
        .filter(|group| !group.is_empty())
        .map(|group| {
            let mut group = group.to_vec();
            group.sort_unstable();
            group
        })
        .collect()
}

/// Per-cell generator derived from the estimator seed, independent of the order
/// in which cells are visited. The cell selects a ChaCha stream, so the sequence is
/// identical on every platform.
pub fn cell_rng(seed: u64, cell: (usize, usize)) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(((cell.0 as u64) << 32) | cell.1 as u64);
    rng
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{anchor_fixture, fixture_panel};

    #[test]
    fn split_sizes_follow_remainder() {
        let seq: Vec<usize> = (0..35).collect();
        for k in [2, 4, 5] {
            let groups = split(&seq, k);
            assert_eq!(groups.len(), k);
            assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), 35);
            for (i, group) in groups.iter().enumerate() {
                let expected = 35 / k + usize::from(i < 35 % k);
                assert_eq!(group.len(), expected, "k = {k}, group {i}");
            }
            let rejoined: Vec<usize> = groups.concat();
            assert_eq!(rejoined, seq);
        }
        assert_eq!(split(&seq, 2)[0].len(), 18);
        assert_eq!(split(&seq, 4)[2].len(), 9);
        assert_eq!(split(&seq, 4)[3].len(), 8);
        assert!(split(&seq, 0).is_empty());
    }

    #[test]
    fn fixture_anchor_is_the_unique_maximum() {
        let x = anchor_fixture();
        let cache = AnchorCache::new();
        let anchors = find_anchors(x.view(), (0, 0), &cache).unwrap();
        assert_eq!(anchors.rows, vec![1, 2, 3, 4, 6, 7, 8]);
        assert_eq!(anchors.cols, vec![2, 3, 4, 5, 6]);
        assert_eq!(anchors.area(), 35);
    }

    #[test]
    fn anchors_are_fully_observed() {
        let x = anchor_fixture();
        let cache = AnchorCache::new();
        for cell in [(0, 0), (7, 1), (8, 1), (5, 6)] {
            let anchors = find_anchors(x.view(), cell, &cache).unwrap();
            assert!(!anchors.rows.contains(&cell.0));
            assert!(!anchors.cols.contains(&cell.1));
            for &i in &anchors.rows {
                assert!(!x[(i, cell.1)].is_nan());
                for &j in &anchors.cols {
                    assert!(!x[(i, j)].is_nan());
                }
            }
        }
    }

    #[test]
    fn cache_is_pure_and_clearable() {
        let x = anchor_fixture();
        let cache = AnchorCache::new();
        let first = find_anchors(x.view(), (0, 0), &cache);
        assert_eq!(cache.len(), 1);
        let hit = find_anchors(x.view(), (0, 0), &cache);
        assert_eq!(cache.len(), 1);
        cache.clear();
        cache.clear();
        assert!(cache.is_empty());
        let recomputed = find_anchors(x.view(), (0, 0), &cache);
        assert_eq!(first, hit);
        assert_eq!(first, recomputed);
    }

    #[test]
    fn cache_distinguishes_missingness_patterns() {
        let cache = AnchorCache::new();
        let x = anchor_fixture();
        let mut y = x.clone();
        y[(4, 3)] = f64::NAN;
        let rows: Vec<usize> = (1..9).collect();
        let cols: Vec<usize> = (1..7).collect();
        let from_x = get_anchors(x.view(), &rows, &cols, &cache).unwrap();
        let from_y = get_anchors(y.view(), &rows, &cols, &cache).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(from_y.rows.iter().all(|&i| from_y.cols.iter().all(|&j| !y[(i, j)].is_nan())));
        assert_ne!(from_x, from_y);
    }

    #[test]
    fn hole_free_candidates_short_circuit() {
        let x = fixture_panel(6, 5);
        let cache = AnchorCache::new();
        let anchors = get_anchors(x.view(), &[3, 1, 2, 1], &[4, 0], &cache).unwrap();
        assert_eq!(anchors.rows, vec![1, 2, 3]);
        assert_eq!(anchors.cols, vec![0, 4]);
        assert!(cache.is_empty());
        assert_eq!(get_anchors(x.view(), &[], &[0], &cache), None);
    }

    #[test]
    fn isolated_target_has_no_anchors() {
        let mut x = fixture_panel(4, 4);
        for i in 1..4 {
            x[(i, 2)] = f64::NAN;
        }
        x[(0, 2)] = f64::NAN;
        let cache = AnchorCache::new();
        assert_eq!(find_anchors(x.view(), (0, 2), &cache), None);
    }

    #[test]
    fn scattered_holes_on_a_large_panel_finish_quickly() {
        let mut x = fixture_panel(100, 50);
        for ((i, j), value) in x.indexed_iter_mut() {
            let mut h = (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
                ^ (j as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            h ^= h >> 31;
            h = h.wrapping_mul(0x94D0_49BB_1331_11EB);
            h ^= h >> 29;
            if h % 10 == 0 {
                *value = f64::NAN;
            }
        }
        let cache = AnchorCache::new();
        let started = std::time::Instant::now();
        for cell in [(0, 0), (37, 12), (99, 49)] {
            if let Some(anchors) = find_anchors(x.view(), cell, &cache) {
                assert!(anchors.rows.iter().all(|&i| anchors.cols.iter().all(|&j| !x[(i, j)].is_nan())));
            }
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn neighbor_groups_are_seeded_per_cell() {
        let rows: Vec<usize> = (10..20).collect();
        let plain = neighbor_groups(&rows, 3, None);
        assert_eq!(plain, vec![vec![10, 11, 12, 13], vec![14, 15, 16], vec![17, 18, 19]]);

        let a = neighbor_groups(&rows, 3, Some(&mut cell_rng(7, (2, 5))));
        let b = neighbor_groups(&rows, 3, Some(&mut cell_rng(7, (2, 5))));
        assert_eq!(a, b);
        assert_eq!(a, vec![vec![13, 16, 17, 18], vec![11, 15, 19], vec![10, 12, 14]]);
        assert_eq!(
            neighbor_groups(&rows, 3, Some(&mut cell_rng(7, (5, 2)))),
            vec![vec![10, 11, 13, 18], vec![12, 14, 15], vec![16, 17, 19]]
        );
        assert_eq!(
            neighbor_groups(&rows, 3, Some(&mut cell_rng(8, (2, 5)))),
            vec![vec![11, 12, 16, 17], vec![10, 13, 19], vec![14, 15, 18]]
        );
        let mut all: Vec<usize> = a.concat();
        all.sort_unstable();
        assert_eq!(all, rows);

        assert_eq!(neighbor_groups(&rows[..2], 5, None).len(), 2);
    }
}
