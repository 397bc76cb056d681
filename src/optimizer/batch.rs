//! Independent runs over several mode/objective combinations.

use std::sync::Arc;

use futures::future::join_all;
use itertools::iproduct;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::domain::{InputSeries, OptimizationObjective, SchedulingMode, TimeHorizon};
use crate::error::DispatchError;
use crate::optimizer::engine::{DispatchEngine, DispatchOutcome, DispatchRequest};
use crate::optimizer::solver::SolveStatus;

#[derive(Debug)]
pub struct BatchEntry {
    pub request: DispatchRequest,
    pub result: Result<DispatchOutcome, DispatchError>,
}

/// One line of a comparison table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub mode: SchedulingMode,
    pub objective: OptimizationObjective,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SolveStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Schedules each run on the blocking pool; runs share only read-only inputs.
pub struct BatchRunner {
    engine: Arc<DispatchEngine>,
    horizon: Arc<TimeHorizon>,
    series: Arc<InputSeries>,
}

impl BatchRunner {
    pub fn new(engine: Arc<DispatchEngine>, horizon: TimeHorizon, series: InputSeries) -> Self {
        Self {
            engine,
            horizon: Arc::new(horizon),
            series: Arc::new(series),
        }
    }

    /// Every mode against one objective.
    pub fn all_modes(objective: OptimizationObjective) -> Vec<DispatchRequest> {
        SchedulingMode::iter()
            .map(|mode| DispatchRequest::new(mode, objective))
            .collect()
    }

    /// Every mode against every objective.
    pub fn full_matrix() -> Vec<DispatchRequest> {
        iproduct!(SchedulingMode::iter(), OptimizationObjective::iter())
            .map(|(mode, objective)| DispatchRequest::new(mode, objective))
            .collect()
    }

    /// Runs all requests and returns once every run has finished, in request order.
    pub async fn run(&self, requests: Vec<DispatchRequest>) -> Vec<BatchEntry> {
        debug!(runs = requests.len(), "starting batch");
        let tasks = requests.iter().map(|&request| {
            let engine = Arc::clone(&self.engine);
            let horizon = Arc::clone(&self.horizon);
            let series = Arc::clone(&self.series);
            tokio::task::spawn_blocking(move || engine.run(request, &horizon, &series))
        });

        let joined = join_all(tasks).await;

        requests
            .into_iter()
            .zip(joined)
            .map(|(request, joined)| {
                let result = joined.unwrap_or_else(|e| Err(DispatchError::Execution(e.to_string())));
                if let Err(err) = &result {
                    warn!(mode = %request.mode, objective = %request.objective, error = %err, "run failed");
                }
                BatchEntry { request, result }
            })
            .collect()
    }
}

/// Comparison rows, solved runs first by ascending net cost.
pub fn summarize(entries: &[BatchEntry]) -> Vec<ComparisonRow> {
    let mut rows: Vec<ComparisonRow> = entries
        .iter()
        .map(|entry| {
            let mut row = ComparisonRow {
                mode: entry.request.mode,
                objective: entry.request.objective,
                status: None,
                objective_value: None,
                net_cost: None,
                gap: None,
                error: None,
            };
            match &entry.result {
                Ok(outcome) => {
                    row.status = Some(outcome.status);
                    row.objective_value = outcome.objective_value;
                    row.gap = outcome.gap;
                    row.net_cost = outcome.solution.as_ref().map(|s| s.breakdown.net_cost());
                }
                Err(err) => row.error = Some(err.to_string()),
            }
            row
        })
        .collect();

    rows.sort_by(|a, b| match (a.net_cost, b.net_cost) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    rows
}
