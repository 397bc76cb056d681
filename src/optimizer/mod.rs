pub mod batch;
pub mod engine;
pub mod extract;
pub mod metrics;
pub mod milp;
pub mod model;
pub mod objective;
pub mod solver;

pub use batch::*;
pub use engine::*;
pub use extract::*;
pub use metrics::*;
pub use model::*;
pub use objective::*;
pub use solver::{
    backend_for, BackendKind, BranchAndBound, MilpBackend, RawSolution, SolveStats, SolveStatus,
    SolverConfig,
};
