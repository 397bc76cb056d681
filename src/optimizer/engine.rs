//! One dispatch run: select mode, compose objective, build, solve, extract.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    InputSeries, OptimizationObjective, ResourceConfig, SchedulingMode, TimeHorizon,
};
use crate::error::DispatchError;
use crate::optimizer::extract::{DispatchSolution, ResultExtractor};
use crate::optimizer::model::{DispatchModel, ModelBuilder};
use crate::optimizer::objective::{ComposedObjective, ObjectiveComposer};
use crate::optimizer::solver::{backend_for, MilpBackend, SolveStatus, SolverConfig};

/// Mode and objective of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DispatchRequest {
    pub mode: SchedulingMode,
    pub objective: OptimizationObjective,
}

impl DispatchRequest {
    pub fn new(mode: SchedulingMode, objective: OptimizationObjective) -> Self {
        Self { mode, objective }
    }

    /// Parses identifiers such as `("storage_only", "cost_minimization")`.
    pub fn from_ids(mode: &str, objective: &str) -> Result<Self, DispatchError> {
        Ok(Self {
            mode: SchedulingMode::from_id(mode)?,
            objective: OptimizationObjective::from_id(objective)?,
        })
    }
}

/// Terminal result of a run. Solver failures are outcomes, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub id: Uuid,
    pub mode: SchedulingMode,
    pub objective: OptimizationObjective,
    pub backend: &'static str,
    pub status: SolveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub nodes: usize,
    pub solve_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<DispatchSolution>,
}

/// Runs dispatch requests against a fixed resource configuration.
pub struct DispatchEngine {
    resources: ResourceConfig,
    solver: SolverConfig,
    backend: Arc<dyn MilpBackend>,
}

impl DispatchEngine {
    /// Engine with the backend named in `solver`.
    pub fn new(resources: ResourceConfig, solver: SolverConfig) -> Result<Self, DispatchError> {
        let backend = backend_for(solver.backend)?;
        Ok(Self::with_backend(resources, solver, backend))
    }

    pub fn with_backend(resources: ResourceConfig, solver: SolverConfig, backend: Arc<dyn MilpBackend>) -> Self {
        Self {
            resources,
            solver,
            backend,
        }
    }

    pub fn resources(&self) -> &ResourceConfig {
        &self.resources
    }

    pub fn solver_config(&self) -> &SolverConfig {
        &self.solver
    }

    /// Everything before the solve: objective composition, validation and model
    /// construction. Configuration and validation errors surface here.
    pub fn prepare(
        &self,
        request: DispatchRequest,
        horizon: &TimeHorizon,
        series: &InputSeries,
    ) -> Result<(DispatchModel, ComposedObjective), DispatchError> {
        let capabilities = request.mode.capabilities();
        let composed = ObjectiveComposer::compose(request.objective, capabilities)?;

        self.resources.ensure_valid()?;
        self.solver.ensure_valid()?;
        series.ensure_matches(horizon)?;

        let mut model = ModelBuilder::new(&self.resources, horizon, capabilities).build(series);
        let objective = composed.expression(&model, horizon, series, &self.resources);
        model.problem.set_objective(objective);
        Ok((model, composed))
    }

    #[instrument(skip_all, fields(mode = %request.mode, objective = %request.objective))]
    pub fn run(
        &self,
        request: DispatchRequest,
        horizon: &TimeHorizon,
        series: &InputSeries,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (model, composed) = self.prepare(request, horizon, series)?;

        let raw = self.backend.solve(&model.problem, &self.solver);
        let mut outcome = DispatchOutcome {
            id: Uuid::new_v4(),
            mode: request.mode,
            objective: request.objective,
            backend: self.backend.name(),
            status: raw.status,
            objective_value: None,
            gap: None,
            message: raw.message.clone(),
            nodes: raw.stats.nodes,
            solve_seconds: raw.stats.elapsed.as_secs_f64(),
            solution: None,
        };

        let (Some(objective), Some(values)) = (raw.objective, raw.values.as_deref()) else {
            if raw.status.has_solution() {
                return Err(DispatchError::InvariantViolation(format!(
                    "{} returned {} without an assignment",
                    self.backend.name(),
                    raw.status
                )));
            }
            warn!(status = %raw.status, message = ?raw.message, "run ended without a schedule");
            return Ok(outcome);
        };

        if !raw.status.has_solution() {
            warn!(status = %raw.status, "backend returned an assignment with a terminal status; ignoring it");
            return Ok(outcome);
        }

        let solution =
            ResultExtractor::new(&model, &composed, &self.resources, horizon, series).extract(objective, values)?;

        info!(
            status = %raw.status,
            objective,
            gap = raw.gap,
            net_cost = solution.breakdown.net_cost(),
            nodes = raw.stats.nodes,
            "dispatch solved"
        );

        outcome.objective_value = Some(objective);
        outcome.gap = raw.gap;
        outcome.solution = Some(solution);
        Ok(outcome)
    }
}
