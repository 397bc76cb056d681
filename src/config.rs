use anyhow::{Context, Result};
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;

use crate::domain::{InputSeries, OptimizationObjective, ResourceConfig, TimeHorizon};
use crate::optimizer::{BatchRunner, DispatchRequest, SolverConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub horizon: TimeHorizon,
    pub series: InputSeries,
}

/// Which runs the binary executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunScope {
    /// The configured mode and objective.
    #[default]
    Single,
    /// Every mode against the configured objective.
    AllModes,
    /// Every mode against every objective.
    Matrix,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub mode: String,
    pub objective: String,
    #[serde(default)]
    pub scope: RunScope,
}

impl RunConfig {
    pub fn requests(&self) -> Result<Vec<DispatchRequest>> {
        Ok(match self.scope {
            RunScope::Single => vec![DispatchRequest::from_ids(&self.mode, &self.objective)?],
            RunScope::AllModes => {
                BatchRunner::all_modes(OptimizationObjective::from_id(&self.objective)?)
            }
            RunScope::Matrix => BatchRunner::full_matrix(),
        })
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("VPP__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment.extract().context("invalid dispatch configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SchedulingMode;

    fn default_file() -> Figment {
        Figment::new().merge(Toml::file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml")))
    }

    #[test]
    fn test_default_config_file_loads() {
        let config = Config::from_figment(default_file()).unwrap();
        assert_eq!(config.horizon.steps, 24);
        assert!(config.series.ensure_matches(&config.horizon).is_ok());
        assert!(config.resources.ensure_valid().is_ok());
        assert_eq!(config.solver.threads, 4);
        assert_eq!(config.resources.storage.energy_mwh, 200.0);
    }

    #[test]
    fn test_toml_overrides_merge_over_defaults() {
        let overrides = r#"
            [run]
            scope = "all_modes"

            [solver]
            time_limit_secs = 5.0

            [resources.thermal]
            ramp_mw_per_h = 30.0
        "#;
        let config = Config::from_figment(default_file().merge(Toml::string(overrides))).unwrap();
        assert_eq!(config.solver.time_limit_secs, 5.0);
        assert_eq!(config.resources.thermal.ramp_mw_per_h, 30.0);
        assert_eq!(config.resources.thermal.capacity_mw, 100.0);
        assert_eq!(config.run.requests().unwrap().len(), 6);
    }

    #[test]
    fn test_single_run_request() {
        let run = RunConfig {
            mode: "storage_only".to_string(),
            objective: "cost_minimization".to_string(),
            scope: RunScope::Single,
        };
        let requests = run.requests().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].mode, SchedulingMode::StorageOnly);
    }

    #[test]
    fn test_unknown_mode_in_config_rejected() {
        let run = RunConfig {
            mode: "hydro".to_string(),
            objective: "cost_minimization".to_string(),
            scope: RunScope::Single,
        };
        assert!(run.requests().is_err());
    }
}
