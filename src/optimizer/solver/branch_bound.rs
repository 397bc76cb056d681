//! Best-first branch-and-bound over LP relaxations.
//!
//! The root relaxation and a rounding heuristic always run. After that the
//! search pops up to `threads` open nodes at a time, relaxes them concurrently
//! and merges the results in pop order, so a run is reproducible whenever it is
//! not cut short by the time limit. The limit is checked between batches.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};

use crate::optimizer::milp::MilpProblem;
use crate::optimizer::solver::relaxation::{LpOutcome, LpRelaxation, MicroLp};
use crate::optimizer::solver::{relative_gap, MilpBackend, RawSolution, SolveStats, SolveStatus, SolverConfig};

/// Binary values closer than this to 0 or 1 count as integral.
const INTEGRALITY_TOLERANCE: f64 = 1e-6;

/// A node whose bound is within this distance of the incumbent is pruned.
const PRUNE_ABS: f64 = 1e-7;
const PRUNE_REL: f64 = 1e-9;

/// The rounding heuristic is retried at nodes whose depth is a multiple of this.
const HEURISTIC_EVERY_DEPTH: usize = 4;

#[derive(Debug, Clone)]
struct Node {
    bounds: Vec<(f64, f64)>,
    /// Objective of the parent relaxation, a lower bound for the subtree.
    bound: f64,
    depth: usize,
    seq: u64,
}

impl Node {
    fn key(&self) -> (Reverse<OrderedFloat<f64>>, usize, Reverse<u64>) {
        (Reverse(OrderedFloat(self.bound)), self.depth, Reverse(self.seq))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    // lowest bound first, then deepest, then oldest
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Clone)]
struct Incumbent {
    objective: f64,
    values: Vec<f64>,
}

/// Default MILP backend.
#[derive(Debug, Clone)]
pub struct BranchAndBound<R = MicroLp> {
    relaxation: R,
}

impl BranchAndBound<MicroLp> {
    pub fn new() -> Self {
        Self { relaxation: MicroLp }
    }
}

impl Default for BranchAndBound<MicroLp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: LpRelaxation> BranchAndBound<R> {
    pub fn with_relaxation(relaxation: R) -> Self {
        Self { relaxation }
    }

    fn search(&self, problem: &MilpProblem, config: &SolverConfig) -> RawSolution {
        let started = Instant::now();
        let time_limit = config.time_limit();
        let binaries = problem.binary_indices();
        let root_bounds = problem.bounds();
        let mut nodes = 1usize;
        let stats = |nodes: usize| SolveStats {
            nodes,
            elapsed: started.elapsed(),
        };

        let (root_objective, root_values) = match self.relaxation.solve_relaxation(problem, &root_bounds) {
            LpOutcome::Solved { objective, values } => (objective, values),
            LpOutcome::Infeasible => {
                return RawSolution::without_assignment(SolveStatus::Infeasible, "root relaxation is infeasible", stats(nodes))
            }
            LpOutcome::Unbounded => {
                return RawSolution::without_assignment(SolveStatus::Unbounded, "root relaxation is unbounded", stats(nodes))
            }
            LpOutcome::Failed(message) => {
                return RawSolution::without_assignment(SolveStatus::Error, message, stats(nodes))
            }
        };

        let Some(branch_index) = most_fractional(&binaries, &root_values) else {
            debug!(objective = root_objective, "root relaxation is integral");
            return RawSolution::with_assignment(SolveStatus::Optimal, root_objective, root_values, 0.0, stats(nodes));
        };

        let mut incumbent = self.round_and_resolve(problem, &root_bounds, &binaries, &root_values);
        if let Some(found) = &incumbent {
            debug!(
                objective = found.objective,
                bound = root_objective,
                "rounding heuristic found an incumbent"
            );
        }

        let mut seq = 0u64;
        let mut queue = BinaryHeap::new();
        push_children(&mut queue, &mut seq, &root_bounds, branch_index, &root_values, root_objective, 0);

        loop {
            let best_bound = match queue.peek() {
                Some(node) => node.bound,
                None => {
                    return match incumbent {
                        Some(best) => RawSolution::with_assignment(
                            SolveStatus::Optimal,
                            best.objective,
                            best.values,
                            0.0,
                            stats(nodes),
                        ),
                        None => RawSolution::without_assignment(
                            SolveStatus::Infeasible,
                            "no integer-feasible assignment exists",
                            stats(nodes),
                        ),
                    };
                }
            };

            if let Some(best) = &incumbent {
                let gap = relative_gap(best.objective, best_bound);
                if gap <= config.relative_gap {
                    debug!(nodes, gap, "gap target reached");
                    return RawSolution::with_assignment(
                        SolveStatus::Optimal,
                        best.objective,
                        best.values.clone(),
                        gap,
                        stats(nodes),
                    );
                }
            }

            if started.elapsed() >= time_limit {
                return match incumbent {
                    Some(best) => {
                        let gap = relative_gap(best.objective, best_bound);
                        info!(nodes, gap, open = queue.len(), "time limit reached with incumbent");
                        RawSolution::with_assignment(
                            SolveStatus::FeasibleTimeLimit,
                            best.objective,
                            best.values,
                            gap,
                            stats(nodes),
                        )
                    }
                    None => RawSolution::without_assignment(
                        SolveStatus::Error,
                        "time limit reached before a feasible assignment was found",
                        stats(nodes),
                    ),
                };
            }

            let batch = pop_batch(&mut queue, config.threads.max(1), incumbent.as_ref());
            if batch.is_empty() {
                continue;
            }
            let outcomes = self.relax_batch(problem, &batch);
            nodes += batch.len();

            for (node, outcome) in batch.into_iter().zip(outcomes) {
                let (objective, values) = match outcome {
                    LpOutcome::Solved { objective, values } => (objective, values),
                    LpOutcome::Infeasible | LpOutcome::Unbounded => continue,
                    LpOutcome::Failed(message) => {
                        warn!(%message, depth = node.depth, "node relaxation failed");
                        return RawSolution::without_assignment(SolveStatus::Error, message, stats(nodes));
                    }
                };

                if incumbent.as_ref().is_some_and(|best| dominated(objective, best.objective)) {
                    continue;
                }

                match most_fractional(&binaries, &values) {
                    None => {
                        incumbent = Some(Incumbent { objective, values });
                    }
                    Some(index) => {
                        if node.depth % HEURISTIC_EVERY_DEPTH == 0 {
                            if let Some(found) = self.round_and_resolve(problem, &node.bounds, &binaries, &values) {
                                if incumbent.as_ref().map_or(true, |best| found.objective < best.objective) {
                                    incumbent = Some(found);
                                }
                            }
                        }
                        push_children(&mut queue, &mut seq, &node.bounds, index, &values, objective, node.depth + 1);
                    }
                }
            }
        }
    }

    fn relax_batch(&self, problem: &MilpProblem, batch: &[Node]) -> Vec<LpOutcome> {
        if batch.len() == 1 {
            return vec![self.relaxation.solve_relaxation(problem, &batch[0].bounds)];
        }
        std::thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|node| scope.spawn(|| self.relaxation.solve_relaxation(problem, &node.bounds)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| LpOutcome::Failed("relaxation worker panicked".to_string()))
                })
                .collect()
        })
    }

    /// Fixes every binary to a rounded value and re-solves the remaining LP.
    ///
    /// Rounds fractional values up first (keeps commitments that carry output),
    /// then to nearest.
    fn round_and_resolve(
        &self,
        problem: &MilpProblem,
        bounds: &[(f64, f64)],
        binaries: &[usize],
        values: &[f64],
    ) -> Option<Incumbent> {
        let strategies: [fn(f64) -> f64; 2] = [
            |v| if v > INTEGRALITY_TOLERANCE { 1.0 } else { 0.0 },
            |v| if v >= 0.5 { 1.0 } else { 0.0 },
        ];

        strategies.iter().find_map(|round| {
            let mut fixed = bounds.to_vec();
            for &index in binaries {
                let (lower, upper) = fixed[index];
                let value = round(values[index]).clamp(lower, upper);
                fixed[index] = (value, value);
            }
            match self.relaxation.solve_relaxation(problem, &fixed) {
                LpOutcome::Solved { objective, values } => Some(Incumbent { objective, values }),
                _ => None,
            }
        })
    }
}

impl<R: LpRelaxation> MilpBackend for BranchAndBound<R> {
    fn name(&self) -> &'static str {
        "branch_and_bound"
    }

    fn solve(&self, problem: &MilpProblem, config: &SolverConfig) -> RawSolution {
        let result = self.search(problem, config);
        debug!(
            status = %result.status,
            nodes = result.stats.nodes,
            elapsed_ms = result.stats.elapsed.as_millis() as u64,
            gap = result.gap,
            "branch and bound finished"
        );
        result
    }
}

fn dominated(bound: f64, incumbent: f64) -> bool {
    bound >= incumbent - PRUNE_ABS - PRUNE_REL * incumbent.abs()
}

/// Binary whose value is furthest from integral; ties go to the lowest index.
fn most_fractional(binaries: &[usize], values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &index in binaries {
        let value = values[index];
        let distance = (value - value.round()).abs();
        if distance <= INTEGRALITY_TOLERANCE {
            continue;
        }
        if best.map_or(true, |(_, d)| distance > d) {
            best = Some((index, distance));
        }
    }
    best.map(|(index, _)| index)
}

fn push_children(
    queue: &mut BinaryHeap<Node>,
    seq: &mut u64,
    bounds: &[(f64, f64)],
    index: usize,
    values: &[f64],
    bound: f64,
    depth: usize,
) {
    // the branch the relaxation leans towards is explored first
    let order = if values[index] >= 0.5 { [1.0, 0.0] } else { [0.0, 1.0] };
    for fixed in order {
        let mut child = bounds.to_vec();
        child[index] = (fixed, fixed);
        *seq += 1;
        queue.push(Node {
            bounds: child,
            bound,
            depth,
            seq: *seq,
        });
    }
}

fn pop_batch(queue: &mut BinaryHeap<Node>, size: usize, incumbent: Option<&Incumbent>) -> Vec<Node> {
    let mut batch = Vec::with_capacity(size);
    while batch.len() < size {
        let Some(node) = queue.pop() else {
            break;
        };
        if incumbent.is_some_and(|best| dominated(node.bound, best.objective)) {
            continue;
        }
        batch.push(node);
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::milp::{ConstraintGroup, ConstraintTag, LinearExpr, Sense};

    /// Knapsack: max 10a + 13b + 7c s.t. 4a + 6b + 3c <= 9, binaries.
    fn knapsack() -> MilpProblem {
        let mut problem = MilpProblem::new();
        let a = problem.add_binary("a");
        let b = problem.add_binary("b");
        let c = problem.add_binary("c");
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::ChargeLimit, 1),
            LinearExpr::new().plus(a, 4.0).plus(b, 6.0).plus(c, 3.0),
            Sense::Le,
            9.0,
        );
        problem.set_objective(LinearExpr::new().plus(a, -10.0).plus(b, -13.0).plus(c, -7.0));
        problem
    }

    fn exact() -> SolverConfig {
        SolverConfig {
            relative_gap: 0.0,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn test_solves_knapsack_to_optimality() {
        let result = BranchAndBound::new().solve(&knapsack(), &exact());
        assert_eq!(result.status, SolveStatus::Optimal);
        // b + c = 20 beats a + c = 17
        assert!((result.objective.unwrap() + 20.0).abs() < 1e-6);
        let values = result.values.unwrap();
        assert!(values[0] < 0.5 && values[1] > 0.5 && values[2] > 0.5);
        assert_eq!(result.gap, Some(0.0));
    }

    #[test]
    fn test_single_thread_matches_parallel() {
        let single = BranchAndBound::new().solve(
            &knapsack(),
            &SolverConfig {
                threads: 1,
                ..exact()
            },
        );
        let parallel = BranchAndBound::new().solve(&knapsack(), &exact());
        assert_eq!(single.objective, parallel.objective);
        assert_eq!(single.values, parallel.values);
    }

    #[test]
    fn test_integer_infeasible_problem() {
        // x binary, 0.2 <= x <= 0.8
        let mut problem = MilpProblem::new();
        let x = problem.add_binary("x");
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::ThermalMinOutput, 1),
            LinearExpr::new().plus(x, 1.0),
            Sense::Ge,
            0.2,
        );
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::ThermalMaxOutput, 1),
            LinearExpr::new().plus(x, 1.0),
            Sense::Le,
            0.8,
        );
        problem.set_objective(LinearExpr::new().plus(x, 1.0));
        let result = BranchAndBound::new().solve(&problem, &exact());
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert!(result.values.is_none());
    }

    #[test]
    fn test_unbounded_root() {
        let mut problem = MilpProblem::new();
        let x = problem.add_continuous("x", 0.0, f64::INFINITY);
        problem.set_objective(LinearExpr::new().plus(x, -1.0));
        let result = BranchAndBound::new().solve(&problem, &exact());
        assert_eq!(result.status, SolveStatus::Unbounded);
    }

    #[test]
    fn test_zero_time_limit_returns_incumbent_with_gap() {
        let config = SolverConfig {
            time_limit_secs: 0.0,
            ..exact()
        };
        let result = BranchAndBound::new().solve(&knapsack(), &config);
        assert_eq!(result.status, SolveStatus::FeasibleTimeLimit);
        assert!(result.gap.unwrap() > 0.0);
        assert!(result.values.is_some());
    }

    #[test]
    fn test_node_ordering_prefers_lower_bound() {
        let mut queue = BinaryHeap::new();
        for (bound, seq) in [(5.0, 1), (1.0, 2), (3.0, 3)] {
            queue.push(Node {
                bounds: Vec::new(),
                bound,
                depth: 0,
                seq,
            });
        }
        let order: Vec<f64> = std::iter::from_fn(|| queue.pop().map(|n| n.bound)).collect();
        assert_eq!(order, vec![1.0, 3.0, 5.0]);
    }
}
