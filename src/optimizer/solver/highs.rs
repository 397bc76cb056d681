//! HiGHS backend through `good_lp`.

use std::time::Instant;

use good_lp::{highs, ResolutionError, Solution, SolverModel};
use tracing::debug;

use crate::optimizer::milp::MilpProblem;
use crate::optimizer::solver::external::{integer_variables, root_gap, status_of};
use crate::optimizer::solver::relaxation::{to_expression, with_rows};
use crate::optimizer::solver::{MilpBackend, RawSolution, SolveStats, SolveStatus, SolverConfig};

/// HiGHS with `time_limit`, `mip_rel_gap` and `threads` set from [`SolverConfig`].
/// Status and gap follow the same rules as the CBC backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Highs;

impl MilpBackend for Highs {
    fn name(&self) -> &'static str {
        "highs"
    }

    fn solve(&self, problem: &MilpProblem, config: &SolverConfig) -> RawSolution {
        let started = Instant::now();
        let stats = || SolveStats {
            nodes: 0,
            elapsed: started.elapsed(),
        };

        let (vars, handles) = integer_variables(problem);
        let threads = i32::try_from(config.threads).unwrap_or(i32::MAX);
        let model = vars
            .minimise(to_expression(problem.objective(), &handles))
            .using(highs)
            .set_option("output_flag", false)
            .set_option("threads", threads)
            .set_option("time_limit", config.time_limit_secs)
            .set_option("mip_rel_gap", config.relative_gap);

        let solution = match with_rows(model, problem, &handles).solve() {
            Ok(solution) => solution,
            Err(ResolutionError::Infeasible) => {
                return RawSolution::without_assignment(SolveStatus::Infeasible, "highs proved infeasibility", stats())
            }
            Err(ResolutionError::Unbounded) => {
                return RawSolution::without_assignment(SolveStatus::Unbounded, "highs reported an unbounded model", stats())
            }
            Err(other) => return RawSolution::without_assignment(SolveStatus::Error, other.to_string(), stats()),
        };

        let status = status_of(solution.status());
        let values: Vec<f64> = handles.iter().map(|&v| solution.value(v)).collect();
        let objective = problem.objective_value(&values);
        let gap = root_gap(problem, objective);
        debug!(%status, objective, gap, "highs finished");

        RawSolution::with_assignment(status, objective, values, gap, stats())
    }
}
