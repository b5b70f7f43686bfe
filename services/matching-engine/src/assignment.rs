//! Maximum-weight bipartite assignment (Hungarian, primal-dual)
//!
//! Works on a square weight matrix over two equal-size vertex sets U and V.
//! Dual labels satisfy `lu[u] + lv[v] >= w[u][v]` everywhere and are tight
//! on matched and tree edges. Each phase grows an alternating tree from a
//! free `u`, shifts labels by the minimum slack until a tight edge reaches a
//! free `v`, then flips the path. All per-call state lives on the stack of
//! one `solve` call.

use kpd_types::errors::AssignmentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Weight of a non-edge. Never zero, so a legitimately zero-weight edge is
/// not confused with a missing one.
pub const NON_EDGE: Decimal = Decimal::from_parts(100_000, 0, 0, true, 0);

/// Dense row-major square matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightMatrix {
    n: usize,
    cells: Vec<Decimal>,
}

impl WeightMatrix {
    /// `n × n` matrix filled with `value`.
    pub fn filled(n: usize, value: Decimal) -> Self {
        Self {
            n,
            cells: vec![value; n * n],
        }
    }

    pub fn from_rows(rows: Vec<Vec<Decimal>>) -> Result<Self, AssignmentError> {
        let n = rows.len();
        let mut cells = Vec::with_capacity(n * n);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != n {
                return Err(AssignmentError::NotSquare {
                    rows: n,
                    row,
                    cols: values.len(),
                });
            }
            cells.extend(values);
        }
        Ok(Self { n, cells })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn get(&self, u: usize, v: usize) -> Decimal {
        self.cells[u * self.n + v]
    }

    pub fn set(&mut self, u: usize, v: usize, weight: Decimal) {
        self.cells[u * self.n + v] = weight;
    }

    fn row(&self, u: usize) -> &[Decimal] {
        &self.cells[u * self.n..(u + 1) * self.n]
    }
}

/// Result of one assignment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// `mu[u]` is the `v` matched to `u`
    pub mu: Vec<usize>,
    /// `mv[v]` is the `u` matched to `v`
    pub mv: Vec<usize>,
    pub lu: Vec<Decimal>,
    pub lv: Vec<Decimal>,
    /// Sum of the matched weights
    pub total: Decimal,
}

impl Assignment {
    /// Σlu + Σlv; equals `total` at an optimum.
    pub fn dual_objective(&self) -> Decimal {
        self.lu.iter().copied().sum::<Decimal>() + self.lv.iter().copied().sum::<Decimal>()
    }

    pub fn is_dual_tight(&self) -> bool {
        self.dual_objective() == self.total
    }
}

/// Alternating-tree bookkeeping for one phase.
struct Tree {
    in_s: Vec<bool>,
    /// Tree parent (`u`) of every `v` in T
    parent: Vec<Option<usize>>,
    /// Minimum slack from S to each `v`, and the `u` achieving it
    min_slack: Vec<(Decimal, usize)>,
}

impl Tree {
    fn rooted_at(root: usize, w: &WeightMatrix, lu: &[Decimal], lv: &[Decimal]) -> Self {
        let n = w.size();
        let mut in_s = vec![false; n];
        in_s[root] = true;
        let row = w.row(root);
        Self {
            in_s,
            parent: vec![None; n],
            min_slack: (0..n).map(|v| (lu[root] + lv[v] - row[v], root)).collect(),
        }
    }

    fn in_t(&self, v: usize) -> bool {
        self.parent[v].is_some()
    }
}

/// Hungarian solver. Stateless; labels live inside each `solve` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentSolver;

impl AssignmentSolver {
    pub fn new() -> Self {
        Self
    }

    pub fn solve(&self, w: &WeightMatrix) -> Assignment {
        let n = w.size();
        let mut lu: Vec<Decimal> = (0..n)
            .map(|u| w.row(u).iter().copied().max().unwrap_or(Decimal::ZERO))
            .collect();
        let mut lv = vec![Decimal::ZERO; n];
        let mut mu: Vec<Option<usize>> = vec![None; n];
        let mut mv: Vec<Option<usize>> = vec![None; n];

        for root in 0..n {
            if mu[root].is_some() {
                continue;
            }
            let mut tree = Tree::rooted_at(root, w, &lu, &lv);
            Self::augment(w, &mut tree, &mut lu, &mut lv, &mut mu, &mut mv);
        }

        let mu: Vec<usize> = mu.into_iter().flatten().collect();
        let mv: Vec<usize> = mv.into_iter().flatten().collect();
        let total = mu.iter().enumerate().map(|(u, v)| w.get(u, *v)).sum();
        trace!(n, %total, "assignment solved");
        Assignment { mu, mv, lu, lv, total }
    }

    /// Grow the tree until a free `v` becomes reachable by a tight edge, then
    /// flip the alternating path back to the root.
    fn augment(
        w: &WeightMatrix,
        tree: &mut Tree,
        lu: &mut [Decimal],
        lv: &mut [Decimal],
        mu: &mut [Option<usize>],
        mv: &mut [Option<usize>],
    ) {
        let n = w.size();
        loop {
            // Cheapest v outside T; ties go to the lowest index
            let mut best: Option<(Decimal, usize, usize)> = None;
            for v in (0..n).filter(|v| !tree.in_t(*v)) {
                let (slack, u) = tree.min_slack[v];
                if best.map_or(true, |(s, _, _)| slack < s) {
                    best = Some((slack, u, v));
                }
            }
            let Some((delta, u, v)) = best else {
                return;
            };

            if delta > Decimal::ZERO {
                for (x, label) in lu.iter_mut().enumerate() {
                    if tree.in_s[x] {
                        *label -= delta;
                    }
                }
                for y in 0..n {
                    if tree.in_t(y) {
                        lv[y] += delta;
                    } else {
                        tree.min_slack[y].0 -= delta;
                    }
                }
            }

            tree.parent[v] = Some(u);
            match mv[v] {
                Some(matched) => {
                    tree.in_s[matched] = true;
                    let row = w.row(matched);
                    for y in 0..n {
                        if tree.in_t(y) {
                            continue;
                        }
                        let slack = lu[matched] + lv[y] - row[y];
                        if slack < tree.min_slack[y].0 {
                            tree.min_slack[y] = (slack, matched);
                        }
                    }
                }
                None => {
                    let mut v = v;
                    while let Some(u) = tree.parent[v] {
                        let next = mu[u];
                        mu[u] = Some(v);
                        mv[v] = Some(u);
                        match next {
                            Some(prev) => v = prev,
                            None => break,
                        }
                    }
                    return;
                }
            }
        }
    }
}
