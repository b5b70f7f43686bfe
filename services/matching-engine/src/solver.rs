//! Solver contract and reference branch-and-bound solver
//!
//! Any 0/1 solver can be plugged in through [`Solver`]. The bundled
//! [`BranchAndBound`] explores variables in descending objective order,
//! trying 1 before 0, and prunes with per-constraint activity bounds and an
//! optimistic objective bound over the unfixed variables. The search starts
//! from a greedy incumbent, so a node-limited run still returns a usable
//! packing.

use kpd_types::errors::SolverError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::formulation::{Formulation, Sense};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Search exhausted; the incumbent is optimal
    Optimal,
    /// Search stopped early with a feasible incumbent
    Feasible,
    Infeasible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub status: SolveStatus,
    pub values: Vec<bool>,
    pub objective: Decimal,
    pub nodes: u64,
}

pub trait Solver: std::fmt::Debug + Send + Sync {
    fn solve(&self, formulation: &Formulation) -> Result<Solution, SolverError>;
}

/// Depth-first 0/1 branch and bound.
#[derive(Debug, Clone)]
pub struct BranchAndBound {
    pub node_limit: u64,
}

impl BranchAndBound {
    pub const DEFAULT_NODE_LIMIT: u64 = 200_000;

    pub fn new(node_limit: u64) -> Self {
        Self { node_limit }
    }
}

impl Default for BranchAndBound {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NODE_LIMIT)
    }
}

/// Running activity of one constraint.
#[derive(Debug, Clone, Copy)]
struct Activity {
    fixed: i64,
    /// Sum of negative coefficients over unfixed variables
    free_min: i64,
    /// Sum of positive coefficients over unfixed variables
    free_max: i64,
    sense: Sense,
    rhs: i64,
}

impl Activity {
    fn can_hold(&self) -> bool {
        match self.sense {
            Sense::LessEq => self.fixed + self.free_min <= self.rhs,
            Sense::GreaterEq => self.fixed + self.free_max >= self.rhs,
        }
    }

    fn fix(&mut self, coef: i64, value: bool) {
        self.release(coef);
        if value {
            self.fixed += coef;
        }
    }

    fn unfix(&mut self, coef: i64, value: bool) {
        if value {
            self.fixed -= coef;
        }
        if coef < 0 {
            self.free_min += coef;
        } else {
            self.free_max += coef;
        }
    }

    fn release(&mut self, coef: i64) {
        if coef < 0 {
            self.free_min -= coef;
        } else {
            self.free_max -= coef;
        }
    }
}

/// Search state owned by one `solve` call.
struct Search<'a> {
    formulation: &'a Formulation,
    order: Vec<usize>,
    /// Constraint memberships per variable: (constraint, coefficient)
    memberships: Vec<Vec<(usize, i64)>>,
    activities: Vec<Activity>,
    /// `optimistic[d]`: sum of positive objectives of order[d..]
    optimistic: Vec<Decimal>,
    values: Vec<bool>,
    objective: Decimal,
}

impl<'a> Search<'a> {
    fn new(formulation: &'a Formulation) -> Self {
        let n = formulation.variables.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|a, b| {
            formulation.variables[*b]
                .objective
                .cmp(&formulation.variables[*a].objective)
                .then(a.cmp(b))
        });

        let mut memberships = vec![Vec::new(); n];
        let mut activities = Vec::with_capacity(formulation.constraints.len());
        for (ci, constraint) in formulation.constraints.iter().enumerate() {
            let mut activity = Activity {
                fixed: 0,
                free_min: 0,
                free_max: 0,
                sense: constraint.sense,
                rhs: constraint.rhs,
            };
            for (var, coef) in &constraint.terms {
                if let Some(list) = memberships.get_mut(*var) {
                    list.push((ci, *coef));
                    activity.unfix(*coef, false);
                }
            }
            activities.push(activity);
        }

        let mut optimistic = vec![Decimal::ZERO; n + 1];
        for d in (0..n).rev() {
            let value = formulation.variables[order[d]].objective.max(Decimal::ZERO);
            optimistic[d] = optimistic[d + 1] + value;
        }

        Self {
            formulation,
            order,
            memberships,
            activities,
            optimistic,
            values: vec![false; n],
            objective: Decimal::ZERO,
        }
    }

    /// Fix a variable; returns false (and leaves it fixed) if some
    /// constraint can no longer hold.
    fn fix(&mut self, var: usize, value: bool) -> bool {
        self.values[var] = value;
        if value {
            self.objective += self.formulation.variables[var].objective;
        }
        let mut ok = true;
        for (ci, coef) in &self.memberships[var] {
            let activity = &mut self.activities[*ci];
            activity.fix(*coef, value);
            ok &= activity.can_hold();
        }
        ok
    }

    /// Switch variables on in search order while every constraint they
    /// touch still holds with the remaining variables off. Passes repeat
    /// until nothing is added, so a chain edge whose predecessor came later
    /// in the order is picked up on the next pass. `None` when the all-off
    /// assignment is itself infeasible.
    fn greedy(&self) -> Option<(Decimal, Vec<bool>)> {
        let holds = |activity: &Activity, total: i64| match activity.sense {
            Sense::LessEq => total <= activity.rhs,
            Sense::GreaterEq => total >= activity.rhs,
        };
        if !self.activities.iter().all(|activity| holds(activity, 0)) {
            return None;
        }

        let mut values = vec![false; self.values.len()];
        let mut totals = vec![0i64; self.activities.len()];
        let mut objective = Decimal::ZERO;
        loop {
            let mut added = false;
            for var in &self.order {
                let value = self.formulation.variables[*var].objective;
                if values[*var] || value <= Decimal::ZERO {
                    continue;
                }
                let memberships = &self.memberships[*var];
                if memberships
                    .iter()
                    .all(|(ci, coef)| holds(&self.activities[*ci], totals[*ci] + coef))
                {
                    values[*var] = true;
                    objective += value;
                    for (ci, coef) in memberships {
                        totals[*ci] += coef;
                    }
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
        Some((objective, values))
    }

    fn unfix(&mut self, var: usize) {
        let value = self.values[var];
        if value {
            self.objective -= self.formulation.variables[var].objective;
        }
        for (ci, coef) in &self.memberships[var] {
            self.activities[*ci].unfix(*coef, value);
        }
        self.values[var] = false;
    }
}

impl Solver for BranchAndBound {
    fn solve(&self, formulation: &Formulation) -> Result<Solution, SolverError> {
        let mut search = Search::new(formulation);
        let n = search.order.len();

        if !search.activities.iter().all(Activity::can_hold) {
            return Ok(Solution {
                status: SolveStatus::Infeasible,
                values: Vec::new(),
                objective: Decimal::ZERO,
                nodes: 0,
            });
        }

        let mut best = search.greedy();
        if let Some((objective, _)) = &best {
            debug!(%objective, "greedy incumbent");
        }
        // tried[d]: 0 = nothing yet, 1 = tried 1, 2 = tried both
        let mut tried = vec![0u8; n + 1];
        let mut depth = 0usize;
        let mut nodes = 0u64;
        let mut exhausted = false;

        loop {
            if depth == n {
                if best.as_ref().map_or(true, |(value, _)| search.objective > *value) {
                    best = Some((search.objective, search.values.clone()));
                }
            } else if tried[depth] < 2 {
                nodes += 1;
                if nodes > self.node_limit {
                    break;
                }
                let var = search.order[depth];
                let value = tried[depth] == 0;
                tried[depth] += 1;

                let feasible = search.fix(var, value);
                let promising = best
                    .as_ref()
                    .map_or(true, |(incumbent, _)| search.objective + search.optimistic[depth + 1] > *incumbent);
                if feasible && promising {
                    depth += 1;
                    tried[depth] = 0;
                } else {
                    search.unfix(var);
                }
                continue;
            }

            // Backtrack
            if depth == 0 {
                exhausted = true;
                break;
            }
            depth -= 1;
            search.unfix(search.order[depth]);
        }

        match best {
            Some((objective, values)) => {
                let status = if exhausted {
                    SolveStatus::Optimal
                } else {
                    warn!(node_limit = self.node_limit, "branch and bound stopped at node limit");
                    SolveStatus::Feasible
                };
                debug!(
                    variables = n,
                    constraints = formulation.constraints.len(),
                    nodes,
                    %objective,
                    ?status,
                    "packing solved"
                );
                Ok(Solution {
                    status,
                    values,
                    objective,
                    nodes,
                })
            }
            None if exhausted => Ok(Solution {
                status: SolveStatus::Infeasible,
                values: Vec::new(),
                objective: Decimal::ZERO,
                nodes,
            }),
            None => Err(SolverError::Failed {
                reason: format!("node limit {} reached without a feasible solution", self.node_limit),
            }),
        }
    }
}
