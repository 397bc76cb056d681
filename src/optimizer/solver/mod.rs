//! Solver adapter: hands a [`MilpProblem`] to a MILP backend under the
//! configured controls and reports status, assignment and realised gap.

pub mod branch_bound;
#[cfg(feature = "cbc")]
pub mod cbc;
#[cfg(any(feature = "cbc", feature = "highs"))]
mod external;
#[cfg(feature = "highs")]
pub mod highs;
pub mod relaxation;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

use crate::error::DispatchError;
use crate::optimizer::milp::MilpProblem;

pub use branch_bound::BranchAndBound;
pub use relaxation::{LpOutcome, LpRelaxation, MicroLp};

/// Terminal status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    FeasibleTimeLimit,
    Infeasible,
    Unbounded,
    Error,
}

impl SolveStatus {
    /// Statuses that carry a usable assignment.
    pub fn has_solution(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::FeasibleTimeLimit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-crate branch-and-bound over `microlp` relaxations.
    #[default]
    BranchAndBound,
    /// COIN-OR CBC, requires the `cbc` feature.
    Cbc,
    /// HiGHS, requires the `highs` feature.
    Highs,
}

/// Solve controls.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    pub backend: BackendKind,
    #[validate(range(min = 1, max = 256))]
    pub threads: usize,
    #[validate(range(min = 0.0))]
    pub time_limit_secs: f64,
    /// Relative optimality gap at which the search stops.
    #[validate(range(min = 0.0, max = 1.0))]
    pub relative_gap: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::BranchAndBound,
            threads: 4,
            time_limit_secs: 300.0,
            relative_gap: 0.01,
        }
    }
}

impl SolverConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_limit_secs).unwrap_or(Duration::MAX)
    }

    pub fn ensure_valid(&self) -> Result<(), DispatchError> {
        self.validate()?;
        if !self.time_limit_secs.is_finite() || !self.relative_gap.is_finite() {
            return Err(DispatchError::Validation(
                "solver time limit and gap must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters reported alongside a solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SolveStats {
    pub nodes: usize,
    pub elapsed: Duration,
}

/// Raw backend output. `values` is indexed by [`crate::optimizer::milp::VarId`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawSolution {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub values: Option<Vec<f64>>,
    pub gap: Option<f64>,
    pub message: Option<String>,
    pub stats: SolveStats,
}

impl RawSolution {
    pub fn with_assignment(status: SolveStatus, objective: f64, values: Vec<f64>, gap: f64, stats: SolveStats) -> Self {
        Self {
            status,
            objective: Some(objective),
            values: Some(values),
            gap: Some(gap),
            message: None,
            stats,
        }
    }

    pub fn without_assignment(status: SolveStatus, message: impl Into<String>, stats: SolveStats) -> Self {
        Self {
            status,
            objective: None,
            values: None,
            gap: None,
            message: Some(message.into()),
            stats,
        }
    }
}

/// A MILP engine able to solve a [`MilpProblem`] under [`SolverConfig`] controls.
#[cfg_attr(test, mockall::automock)]
pub trait MilpBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, problem: &MilpProblem, config: &SolverConfig) -> RawSolution;
}

/// Backend for the configured kind.
pub fn backend_for(kind: BackendKind) -> Result<Arc<dyn MilpBackend>, DispatchError> {
    match kind {
        BackendKind::BranchAndBound => Ok(Arc::new(BranchAndBound::new())),
        #[cfg(feature = "cbc")]
        BackendKind::Cbc => Ok(Arc::new(cbc::CoinCbc)),
        #[cfg(not(feature = "cbc"))]
        BackendKind::Cbc => Err(DispatchError::Configuration(
            "the cbc backend requires building with the `cbc` feature".to_string(),
        )),
        #[cfg(feature = "highs")]
        BackendKind::Highs => Ok(Arc::new(highs::Highs)),
        #[cfg(not(feature = "highs"))]
        BackendKind::Highs => Err(DispatchError::Configuration(
            "the highs backend requires building with the `highs` feature".to_string(),
        )),
    }
}

/// `|incumbent - bound| / max(|incumbent|, eps)`, clamped at zero.
pub fn relative_gap(incumbent: f64, bound: f64) -> f64 {
    ((incumbent - bound).max(0.0)) / incumbent.abs().max(1e-9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_solver_controls() {
        let config = SolverConfig::default();
        assert_eq!(config.threads, 4);
        assert_eq!(config.time_limit(), Duration::from_secs(300));
        assert_eq!(config.relative_gap, 0.01);
        assert!(config.ensure_valid().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = SolverConfig {
            threads: 0,
            ..SolverConfig::default()
        };
        assert!(config.ensure_valid().unwrap_err().is_validation());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(SolveStatus::FeasibleTimeLimit.to_string(), "FEASIBLE_TIME_LIMIT");
        assert_eq!(
            serde_json::to_string(&SolveStatus::Optimal).unwrap(),
            "\"OPTIMAL\""
        );
        assert!(SolveStatus::FeasibleTimeLimit.has_solution());
        assert!(!SolveStatus::Infeasible.has_solution());
    }

    #[test]
    fn test_relative_gap() {
        assert!((relative_gap(100.0, 90.0) - 0.1).abs() < 1e-12);
        assert_eq!(relative_gap(100.0, 101.0), 0.0);
        assert!((relative_gap(-100.0, -110.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_default_backend_solves_through_trait_object() {
        use crate::optimizer::milp::{ConstraintGroup, ConstraintTag, LinearExpr, Sense};

        // min x + 2y  s.t.  x + y >= 1, binaries
        let mut problem = MilpProblem::new();
        let x = problem.add_binary("x");
        let y = problem.add_binary("y");
        problem.add_constraint(
            ConstraintTag::new(ConstraintGroup::PowerBalance, 1),
            LinearExpr::new().plus(x, 1.0).plus(y, 1.0),
            Sense::Ge,
            1.0,
        );
        problem.set_objective(LinearExpr::new().plus(x, 1.0).plus(y, 2.0));

        let backend = backend_for(BackendKind::BranchAndBound).unwrap();
        assert_eq!(backend.name(), "branch_and_bound");
        let result = backend.solve(&problem, &SolverConfig::default());
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!((result.objective.unwrap() - 1.0).abs() < 1e-6);
        let values = result.values.unwrap();
        assert!(values[x.index()] > 0.5 && values[y.index()] < 0.5);
    }

    #[cfg(not(feature = "cbc"))]
    #[test]
    fn test_cbc_without_feature_is_configuration_error() {
        assert!(backend_for(BackendKind::Cbc).err().unwrap().is_configuration());
    }

    #[cfg(not(feature = "highs"))]
    #[test]
    fn test_highs_without_feature_is_configuration_error() {
        assert!(backend_for(BackendKind::Highs).err().unwrap().is_configuration());
    }
}
