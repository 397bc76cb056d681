//! Continuous relaxations solved through `good_lp`.

use good_lp::{
    constraint, microlp, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel,
    Variable,
};

use crate::optimizer::milp::{LinearExpr, MilpProblem, Sense};

/// Result of solving one LP relaxation.
#[derive(Debug, Clone, PartialEq)]
pub enum LpOutcome {
    Solved { objective: f64, values: Vec<f64> },
    Infeasible,
    Unbounded,
    Failed(String),
}

/// Solves the problem with integrality dropped and variable bounds replaced by `bounds`.
pub trait LpRelaxation: Send + Sync {
    fn solve_relaxation(&self, problem: &MilpProblem, bounds: &[(f64, f64)]) -> LpOutcome;
}

/// Pure-Rust simplex solver shipped with `good_lp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLp;

impl LpRelaxation for MicroLp {
    fn solve_relaxation(&self, problem: &MilpProblem, bounds: &[(f64, f64)]) -> LpOutcome {
        let mut vars = ProblemVariables::new();
        let handles: Vec<Variable> = bounds
            .iter()
            .map(|&(lower, upper)| vars.add(variable().min(lower).max(upper)))
            .collect();

        let model = vars
            .minimise(to_expression(problem.objective(), &handles))
            .using(microlp);

        match with_rows(model, problem, &handles).solve() {
            Ok(solution) => {
                let values: Vec<f64> = handles.iter().map(|&v| solution.value(v)).collect();
                LpOutcome::Solved {
                    objective: problem.objective_value(&values),
                    values,
                }
            }
            Err(ResolutionError::Infeasible) => LpOutcome::Infeasible,
            Err(ResolutionError::Unbounded) => LpOutcome::Unbounded,
            Err(other) => LpOutcome::Failed(other.to_string()),
        }
    }
}

/// Adds every row of `problem` to a `good_lp` model declared over `handles`.
pub(crate) fn with_rows<M: SolverModel>(mut model: M, problem: &MilpProblem, handles: &[Variable]) -> M {
    for row in problem.constraints() {
        let lhs = to_expression(&row.expr, handles);
        let rhs = row.effective_rhs();
        model = match row.sense {
            Sense::Le => model.with(constraint!(lhs <= rhs)),
            Sense::Ge => model.with(constraint!(lhs >= rhs)),
            Sense::Eq => model.with(constraint!(lhs == rhs)),
        };
    }
    model
}

/// Variable part of `expr` as a `good_lp` expression; constants are handled by the caller.
pub(crate) fn to_expression(expr: &LinearExpr, handles: &[Variable]) -> Expression {
    expr.terms()
        .iter()
        .map(|&(var, coef)| coef * handles[var.index()])
        .sum::<Expression>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::milp::{ConstraintGroup, ConstraintTag};

    #[test]
    fn test_relaxation_solves_simple_lp() {
        // min 3x + 2y  s.t.  x + y = 10, x >= 4
        let mut problem = MilpProblem::new();
        let x = problem.add_continuous("x", 0.0, 100.0);
        let y = problem.add_continuous("y", 0.0, 100.0);
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::PowerBalance, 1),
            LinearExpr::new().plus(x, 1.0).plus(y, 1.0),
            Sense::Eq,
            10.0,
        );
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::ThermalMinOutput, 1),
            LinearExpr::new().plus(x, 1.0),
            Sense::Ge,
            4.0,
        );
        problem.set_objective(LinearExpr::new().plus(x, 3.0).plus(y, 2.0));

        match MicroLp.solve_relaxation(&problem, &problem.bounds()) {
            LpOutcome::Solved { objective, values } => {
                assert!((objective - 24.0).abs() < 1e-6);
                assert!((values[0] - 4.0).abs() < 1e-6);
                assert!((values[1] - 6.0).abs() < 1e-6);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_relaxation_reports_infeasible() {
        let mut problem = MilpProblem::new();
        let x = problem.add_continuous("x", 0.0, 5.0);
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::PowerBalance, 1),
            LinearExpr::new().plus(x, 1.0),
            Sense::Eq,
            10.0,
        );
        problem.set_objective(LinearExpr::new().plus(x, 1.0));
        assert_eq!(
            MicroLp.solve_relaxation(&problem, &problem.bounds()),
            LpOutcome::Infeasible
        );
    }

    #[test]
    fn test_bound_overrides_are_applied() {
        let mut problem = MilpProblem::new();
        let x = problem.add_continuous("x", 0.0, 10.0);
        problem.set_objective(LinearExpr::new().plus(x, -1.0));
        match MicroLp.solve_relaxation(&problem, &[(0.0, 3.0)]) {
            LpOutcome::Solved { values, .. } => assert!((values[0] - 3.0).abs() < 1e-6),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
