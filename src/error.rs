use thiserror::Error;

/// Errors raised by the dispatch engine.
///
/// Solver outcomes such as an infeasible model or an exhausted time limit are
/// not errors; they are reported through [`crate::optimizer::SolveStatus`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Unknown mode or objective identifier, or an objective that needs a
    /// resource the selected mode does not activate.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input series or resource parameters that cannot describe a physical system.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The cost breakdown recomputed from the schedule disagrees with the
    /// objective value reported by the solver.
    #[error("Cost breakdown mismatch: solver reported {reported:.6}, recomputed {recomputed:.6}")]
    BreakdownMismatch { reported: f64, recomputed: f64 },

    /// An accepted assignment breaks one of the model's own constraints.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A run could not be executed to completion (worker panic, cancelled task).
    #[error("Execution error: {0}")]
    Execution(String),
}

impl DispatchError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, DispatchError::Configuration(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, DispatchError::Validation(_))
    }
}

impl From<validator::ValidationErrors> for DispatchError {
    fn from(errors: validator::ValidationErrors) -> Self {
        DispatchError::Validation(errors.to_string())
    }
}
