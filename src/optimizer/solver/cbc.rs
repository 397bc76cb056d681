//! COIN-OR CBC backend through `good_lp`.

use std::time::Instant;

use good_lp::{coin_cbc, ResolutionError, Solution, SolverModel};
use tracing::debug;

use crate::optimizer::milp::MilpProblem;
use crate::optimizer::solver::external::{integer_variables, root_gap, status_of};
use crate::optimizer::solver::relaxation::{to_expression, with_rows};
use crate::optimizer::solver::{MilpBackend, RawSolution, SolveStats, SolveStatus, SolverConfig};

/// CBC stops at proven optimality, at `ratioGap` or at the time limit. Only the
/// last maps to `FEASIBLE_TIME_LIMIT`; the other two are `OPTIMAL`, matching how
/// the branch-and-bound backend treats a reached gap target.
///
/// The reported gap is measured against the `microlp` root relaxation rather
/// than CBC's final bound, so it is an upper bound on the gap CBC closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinCbc;

impl MilpBackend for CoinCbc {
    fn name(&self) -> &'static str {
        "cbc"
    }

    fn solve(&self, problem: &MilpProblem, config: &SolverConfig) -> RawSolution {
        let started = Instant::now();
        let stats = || SolveStats {
            nodes: 0,
            elapsed: started.elapsed(),
        };

        let (vars, handles) = integer_variables(problem);
        let mut model = vars
            .minimise(to_expression(problem.objective(), &handles))
            .using(coin_cbc);
        model.set_parameter("threads", &config.threads.to_string());
        model.set_parameter("seconds", &config.time_limit_secs.to_string());
        model.set_parameter("ratioGap", &config.relative_gap.to_string());
        model.set_parameter("log", "0");

        let solution = match with_rows(model, problem, &handles).solve() {
            Ok(solution) => solution,
            Err(ResolutionError::Infeasible) => {
                return RawSolution::without_assignment(SolveStatus::Infeasible, "cbc proved infeasibility", stats())
            }
            Err(ResolutionError::Unbounded) => {
                return RawSolution::without_assignment(SolveStatus::Unbounded, "cbc reported an unbounded model", stats())
            }
            Err(other) => return RawSolution::without_assignment(SolveStatus::Error, other.to_string(), stats()),
        };

        let status = status_of(solution.status());
        let values: Vec<f64> = handles.iter().map(|&v| solution.value(v)).collect();
        let objective = problem.objective_value(&values);
        let gap = root_gap(problem, objective);
        debug!(%status, objective, gap, "cbc finished");

        RawSolution::with_assignment(status, objective, values, gap, stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::milp::{ConstraintGroup, ConstraintTag, LinearExpr, Sense};

    #[test]
    fn test_cbc_solves_small_commitment() {
        // min 5u + x  s.t.  x <= 10u, x >= 4, u binary
        let mut problem = MilpProblem::new();
        let u = problem.add_binary("u");
        let x = problem.add_continuous("x", 0.0, 10.0);
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::ThermalMaxOutput, 1),
            LinearExpr::new().plus(x, 1.0).plus(u, -10.0),
            Sense::Le,
            0.0,
        );
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::PowerBalance, 1),
            LinearExpr::new().plus(x, 1.0),
            Sense::Ge,
            4.0,
        );
        problem.set_objective(LinearExpr::new().plus(u, 5.0).plus(x, 1.0));

        let result = CoinCbc.solve(&problem, &SolverConfig::default());
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!((result.objective.unwrap() - 9.0).abs() < 1e-6);
        // root relaxation has u = 0.4, bound 6
        assert!(result.gap.unwrap() >= 0.0);
    }
}
