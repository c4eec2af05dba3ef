//! # Observation compatibility graph and maximum biclique search
//!
//! For a target cell the candidate donor rows and columns form a graph in which all
//! rows are mutually adjacent, all columns are mutually adjacent, and a row is
//! adjacent to a column exactly when that entry is observed. Every maximal clique of
//! this graph that touches both sides is a maximal biclique of the observation
//! pattern, so the anchor is the maximal clique with the largest `rows * cols` area.
//!
//! The search enumerates maximal cliques with Bron–Kerbosch (Tomita pivoting) on
//! bitsets and prunes branches whose best possible area is already beaten.
//!
//! Enumeration is exponential in the worst case, so the cost is capped. A greedy
//! peel seeds the incumbent: repeatedly drop the row or column with the largest
//! share of missing entries, then re-admit anything fully observed on what is left.
//! The search then runs for at most `budget` expansions. When the budget runs out,
//! the best biclique seen so far is returned, which is never smaller than the peel.
//! With an unlimited budget the result is the exact maximum with the documented
//! tie-break.

use ndarray::{Array2, ArrayBase, Data, Ix2};
use std::cmp::Ordering;

/// Fixed-capacity bitset over graph node positions.
#[derive(Clone, Debug, PartialEq, Eq)]
struct NodeSet {
    words: Vec<u64>,
}

impl NodeSet {
    fn empty(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    fn full(capacity: usize) -> Self {
        let mut set = Self::empty(capacity);
        for node in 0..capacity {
            set.insert(node);
        }
        set
    }

    #[inline]
    fn insert(&mut self, node: usize) {
        self.words[node / 64] |= 1 << (node % 64);
    }

    #[inline]
    fn remove(&mut self, node: usize) {
        self.words[node / 64] &= !(1 << (node % 64));
    }

    #[inline]
    fn contains(&self, node: usize) -> bool {
        (self.words[node / 64] >> (node % 64)) & 1 == 1
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    fn intersection(&self, other: &Self) -> Self {
        Self {
            words: self.words.iter().zip(&other.words).map(|(a, b)| a & b).collect(),
        }
    }

    fn difference(&self, other: &Self) -> Self {
        Self {
            words: self.words.iter().zip(&other.words).map(|(a, b)| a & !b).collect(),
        }
    }

    fn union(&self, other: &Self) -> Self {
        Self {
            words: self.words.iter().zip(&other.words).map(|(a, b)| a | b).collect(),
        }
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self.intersection(other).count()` without the allocation.
    fn intersection_count(&self, other: &Self) -> usize {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// Number of members strictly below `bound`.
    fn count_below(&self, bound: usize) -> usize {
        let full_words = bound / 64;
        let mut total: usize = self.words[..full_words]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let rem = bound % 64;
        if rem > 0 {
            total += (self.words[full_words] & ((1u64 << rem) - 1)).count_ones() as usize;
        }
        total
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + tz)
            })
        })
    }
}

/// Bipartite compatibility graph between candidate rows and candidate columns.
///
/// Node `i < n_rows` is row `i`; node `n_rows + j` is column `j`.
#[derive(Clone, Debug)]
pub struct ObservationGraph {
    n_rows: usize,
    n_cols: usize,
    neighbors: Vec<NodeSet>,
    n_edges: usize,
}

impl ObservationGraph {
    /// Builds the graph from a row x column incidence matrix (`true` = observed).
    pub fn from_incidence<S: Data<Elem = bool>>(incidence: &ArrayBase<S, Ix2>) -> Self {
        let (n_rows, n_cols) = incidence.dim();
        let n = n_rows + n_cols;
        let mut neighbors = Vec::with_capacity(n);
        let mut n_edges = 0;

        for i in 0..n_rows {
            let mut set = NodeSet::empty(n);
            for other in (0..n_rows).filter(|&other| other != i) {
                set.insert(other);
            }
            for j in 0..n_cols {
                if incidence[(i, j)] {
                    set.insert(n_rows + j);
                    n_edges += 1;
                }
            }
            neighbors.push(set);
        }
        for j in 0..n_cols {
            let mut set = NodeSet::empty(n);
            for other in (0..n_cols).filter(|&other| other != j) {
                set.insert(n_rows + other);
            }
            for i in 0..n_rows {
                if incidence[(i, j)] {
                    set.insert(i);
                }
            }
            neighbors.push(set);
        }

        Self {
            n_rows,
            n_cols,
            neighbors,
            n_edges,
        }
    }

    /// Builds the graph from a candidate submatrix; any non-NaN entry is observed.
    pub fn from_submatrix<S: Data<Elem = f64>>(submatrix: &ArrayBase<S, Ix2>) -> Self {
        let incidence: Array2<bool> = submatrix.map(|v| !v.is_nan());
        Self::from_incidence(&incidence)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of row–column edges (observed entries).
    pub fn n_edges(&self) -> usize {
        self.n_edges
    }

    pub fn is_complete(&self) -> bool {
        self.n_edges == self.n_rows * self.n_cols
    }

    pub fn is_observed(&self, row: usize, col: usize) -> bool {
        self.neighbors[row].contains(self.n_rows + col)
    }

    fn n_nodes(&self) -> usize {
        self.n_rows + self.n_cols
    }
}

/// Row and column positions (sorted, local to the graph) of a biclique.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Biclique {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

impl Biclique {
    pub fn area(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    /// Larger area wins; equal areas fall back to lexicographically smaller rows,
    /// then lexicographically smaller columns.
    fn preference(&self, other: &Self) -> Ordering {
        other
            .area()
            .cmp(&self.area())
            .then_with(|| self.rows.cmp(&other.rows))
            .then_with(|| self.cols.cmp(&other.cols))
    }
}

/// Greedy hole-free biclique used to seed the exact search.
///
/// Each step removes the alive row or column with the largest fraction of missing
/// entries among the alive lines it crosses. Rows are scanned before columns and a
/// later candidate wins an exact tie. Once no holes remain, removed rows and then
/// removed columns are re-admitted in ascending order when fully observed.
fn peel(graph: &ObservationGraph) -> Option<Biclique> {
    let (n_rows, n_cols) = (graph.n_rows, graph.n_cols);
    let mut row_alive = vec![true; n_rows];
    let mut col_alive = vec![true; n_cols];
    let mut row_missing: Vec<usize> = (0..n_rows)
        .map(|i| (0..n_cols).filter(|&j| !graph.is_observed(i, j)).count())
        .collect();
    let mut col_missing: Vec<usize> = (0..n_cols)
        .map(|j| (0..n_rows).filter(|&i| !graph.is_observed(i, j)).count())
        .collect();
    let (mut alive_rows, mut alive_cols) = (n_rows, n_cols);
    let mut holes: usize = row_missing.iter().sum();

    enum Line {
        Row(usize),
        Col(usize),
    }

    while holes > 0 && alive_rows > 0 && alive_cols > 0 {
        // (missing, line length, line); fractions compare by cross-multiplication.
        let mut worst: Option<(usize, usize, Line)> = None;
        let rows = (0..n_rows)
            .filter(|&i| row_alive[i] && row_missing[i] > 0)
            .map(|i| (row_missing[i], alive_cols, Line::Row(i)));
        let cols = (0..n_cols)
            .filter(|&j| col_alive[j] && col_missing[j] > 0)
            .map(|j| (col_missing[j], alive_rows, Line::Col(j)));
        for candidate in rows.chain(cols) {
            let replace = match &worst {
                None => true,
                Some((missing, len, _)) => candidate.0 * len >= missing * candidate.1,
            };
            if replace {
                worst = Some(candidate);
            }
        }
        let Some((_, _, line)) = worst else { break };
        match line {
            Line::Row(i) => {
                row_alive[i] = false;
                alive_rows -= 1;
                holes -= row_missing[i];
                for j in (0..n_cols).filter(|&j| col_alive[j] && !graph.is_observed(i, j)) {
                    col_missing[j] -= 1;
                }
            }
            Line::Col(j) => {
                col_alive[j] = false;
                alive_cols -= 1;
                holes -= col_missing[j];
                for i in (0..n_rows).filter(|&i| row_alive[i] && !graph.is_observed(i, j)) {
                    row_missing[i] -= 1;
                }
            }
        }
    }
    if alive_rows == 0 || alive_cols == 0 {
        return None;
    }

    for i in 0..n_rows {
        if !row_alive[i] && (0..n_cols).all(|j| !col_alive[j] || graph.is_observed(i, j)) {
            row_alive[i] = true;
        }
    }
    for j in 0..n_cols {
        if !col_alive[j] && (0..n_rows).all(|i| !row_alive[i] || graph.is_observed(i, j)) {
            col_alive[j] = true;
        }
    }
    Some(Biclique {
        rows: (0..n_rows).filter(|&i| row_alive[i]).collect(),
        cols: (0..n_cols).filter(|&j| col_alive[j]).collect(),
    })
}

struct Search<'g> {
    graph: &'g ObservationGraph,
    best: Option<Biclique>,
    expansions: usize,
    budget: usize,
    exhausted: bool,
}

impl Search<'_> {
    fn best_area(&self) -> usize {
        self.best.as_ref().map_or(0, Biclique::area)
    }

    fn report(&mut self, clique: &NodeSet) {
        let n_rows = self.graph.n_rows;
        let (rows, cols): (Vec<usize>, Vec<usize>) = clique.iter().partition(|&node| node < n_rows);
        if rows.is_empty() || cols.is_empty() {
            return;
        }
        let candidate = Biclique {
            rows,
            cols: cols.into_iter().map(|node| node - n_rows).collect(),
        };
        let better = match &self.best {
            None => true,
            Some(best) => candidate.preference(best) == Ordering::Less,
        };
        if better {
            self.best = Some(candidate);
        }
    }

    fn expand(&mut self, clique: &NodeSet, mut candidates: NodeSet, mut excluded: NodeSet) {
        if self.expansions >= self.budget {
            self.exhausted = true;
            return;
        }
        self.expansions += 1;

        if candidates.is_empty() {
            if excluded.is_empty() {
                self.report(clique);
            }
            return;
        }

        let graph = self.graph;
        let n_rows = graph.n_rows;
        let reachable = clique.union(&candidates);
        let max_rows = reachable.count_below(n_rows);
        let max_cols = reachable.count() - max_rows;
        if max_rows * max_cols < self.best_area() {
            return;
        }

        let pivot = candidates
            .union(&excluded)
            .iter()
            .max_by_key(|&u| {
                (
                    candidates.intersection_count(&graph.neighbors[u]),
                    std::cmp::Reverse(u),
                )
            })
            .unwrap_or(0);
        let branch: Vec<usize> = candidates
            .difference(&graph.neighbors[pivot])
            .iter()
            .collect();

        for v in branch {
            let adjacent = &graph.neighbors[v];
            let mut extended = clique.clone();
            extended.insert(v);
            self.expand(
                &extended,
                candidates.intersection(adjacent),
                excluded.intersection(adjacent),
            );
            candidates.remove(v);
            excluded.insert(v);
        }
    }
}

/// Result of a budgeted biclique search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BicliqueSearch {
    pub best: Option<Biclique>,
    /// Number of search nodes visited.
    pub expansions: usize,
    /// `true` when the budget cut the search short; `best` may then be suboptimal.
    pub exhausted: bool,
}

/// Maximum-area biclique of the graph, or `None` when no row is adjacent to any column.
///
/// A complete graph returns every row and column without searching.
pub fn find_max_biclique(graph: &ObservationGraph) -> Option<Biclique> {
    find_max_biclique_within(graph, usize::MAX).best
}

/// Like [`find_max_biclique`], but stops after `budget` search expansions and keeps
/// the best biclique found so far. The greedy peel seeds the search, so even a zero
/// budget returns a hole-free biclique whenever one exists.
pub fn find_max_biclique_within(graph: &ObservationGraph, budget: usize) -> BicliqueSearch {
    if graph.n_edges == 0 {
        return BicliqueSearch {
            best: None,
            expansions: 0,
            exhausted: false,
        };
    }
    if graph.is_complete() {
        return BicliqueSearch {
            best: Some(Biclique {
                rows: (0..graph.n_rows).collect(),
                cols: (0..graph.n_cols).collect(),
            }),
            expansions: 0,
            exhausted: false,
        };
    }

    let n = graph.n_nodes();
    let mut search = Search {
        graph,
        best: peel(graph),
        expansions: 0,
        budget,
        exhausted: false,
    };
    search.expand(&NodeSet::empty(n), NodeSet::full(n), NodeSet::empty(n));
    BicliqueSearch {
        best: search.best,
        expansions: search.expansions,
        exhausted: search.exhausted,
    }
}
