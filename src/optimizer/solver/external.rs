//! Plumbing shared by backends that hand the whole MILP to an external solver.

use good_lp::solvers::SolutionStatus;
use good_lp::{variable, ProblemVariables, Variable};

use crate::optimizer::milp::{MilpProblem, VarKind};
use crate::optimizer::solver::relaxation::{LpOutcome, LpRelaxation, MicroLp};
use crate::optimizer::solver::{relative_gap, SolveStatus};

/// Declares every variable with its integrality and bounds.
pub(crate) fn integer_variables(problem: &MilpProblem) -> (ProblemVariables, Vec<Variable>) {
    let mut vars = ProblemVariables::new();
    let handles = problem
        .variables()
        .iter()
        .map(|def| {
            let definition = match def.kind {
                VarKind::Binary => variable().integer(),
                VarKind::Continuous => variable(),
            };
            vars.add(definition.min(def.lower).max(def.upper))
        })
        .collect();
    (vars, handles)
}

/// A stop at the time limit keeps the incumbent; optimality and a reached gap target are `OPTIMAL`.
pub(crate) fn status_of(status: SolutionStatus) -> SolveStatus {
    match status {
        SolutionStatus::TimeLimit => SolveStatus::FeasibleTimeLimit,
        _ => SolveStatus::Optimal,
    }
}

/// Gap of `objective` to the `microlp` root relaxation, an upper bound on the solver's own gap.
pub(crate) fn root_gap(problem: &MilpProblem, objective: f64) -> f64 {
    match MicroLp.solve_relaxation(problem, &problem.bounds()) {
        LpOutcome::Solved { objective: bound, .. } => relative_gap(objective, bound),
        _ => 0.0,
    }
}
