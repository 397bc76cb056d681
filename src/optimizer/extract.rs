//! Turns a raw assignment into a per-step schedule and an independently
//! recomputed cost breakdown.

use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::warn;

use crate::domain::{InputSeries, ResourceConfig, StartupCharging, TimeHorizon};
use crate::error::DispatchError;
use crate::optimizer::metrics::DispatchMetrics;
use crate::optimizer::model::DispatchModel;
use crate::optimizer::objective::{CashFlow, ComposedObjective, CostTerm};

/// Scaled tolerance for re-checking an accepted assignment against the model.
pub const VERIFY_TOLERANCE: f64 = 1e-6;

const BREAKDOWN_ABS_TOLERANCE: f64 = 1e-4;
const BREAKDOWN_REL_TOLERANCE: f64 = 1e-6;

/// Power below this is reported as zero.
const ZERO_POWER_MW: f64 = 1e-9;

/// Buy and sell both above this in one step are flagged.
const EXCHANGE_FLAG_MW: f64 = 1e-6;

/// Dispatch of one step. `None` marks a variable the mode never instantiated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchStep {
    /// 1-based step number.
    pub step: usize,
    pub timestamp: NaiveDateTime,
    pub demand_mw: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thermal_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thermal_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thermal_started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discharge_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discharging: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chiller_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_pump_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_buy_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_sell_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_regulation_mw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spinning_reserve_mw: Option<f64>,
}

impl DispatchStep {
    /// Power injected into the VPP bus.
    pub fn supply_mw(&self) -> f64 {
        [self.pv_mw, self.wind_mw, self.thermal_mw, self.discharge_mw, self.grid_buy_mw]
            .into_iter()
            .flatten()
            .sum()
    }

    /// Power withdrawn from the bus on top of the base demand.
    pub fn flexible_withdrawal_mw(&self) -> f64 {
        [self.chiller_mw, self.heat_pump_mw, self.charge_mw, self.grid_sell_mw]
            .into_iter()
            .flatten()
            .sum()
    }

    pub fn imbalance_mw(&self) -> f64 {
        self.supply_mw() - self.flexible_withdrawal_mw() - self.demand_mw
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEntry {
    pub term: CostTerm,
    pub flow: CashFlow,
    /// Unweighted money amount, always reported as a positive cost or revenue.
    pub amount: f64,
    /// Weight in the optimised objective; 0 when the objective ignores the term.
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub entries: Vec<CostEntry>,
}

impl CostBreakdown {
    pub fn amount(&self, term: CostTerm) -> Option<f64> {
        self.entries.iter().find(|e| e.term == term).map(|e| e.amount)
    }

    pub fn total_cost(&self) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.flow == CashFlow::Cost)
            .map(|e| e.amount)
            .sum()
    }

    pub fn total_revenue(&self) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.flow == CashFlow::Revenue)
            .map(|e| e.amount)
            .sum()
    }

    pub fn net_cost(&self) -> f64 {
        self.total_cost() - self.total_revenue()
    }

    /// Value of the optimised objective implied by the entries.
    pub fn weighted_objective(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.flow.sign() * e.weight * e.amount)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchSolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_soc: Option<f64>,
    pub steps: Vec<DispatchStep>,
    pub breakdown: CostBreakdown,
    pub metrics: DispatchMetrics,
    /// Steps that buy and sell at the same time.
    pub simultaneous_exchange_steps: Vec<usize>,
}

pub struct ResultExtractor<'a> {
    model: &'a DispatchModel,
    composed: &'a ComposedObjective,
    resources: &'a ResourceConfig,
    horizon: &'a TimeHorizon,
    series: &'a InputSeries,
}

impl<'a> ResultExtractor<'a> {
    pub fn new(
        model: &'a DispatchModel,
        composed: &'a ComposedObjective,
        resources: &'a ResourceConfig,
        horizon: &'a TimeHorizon,
        series: &'a InputSeries,
    ) -> Self {
        Self {
            model,
            composed,
            resources,
            horizon,
            series,
        }
    }

    /// Builds the solution and cross-checks it against the model and the
    /// solver-reported objective.
    pub fn extract(&self, reported_objective: f64, values: &[f64]) -> Result<DispatchSolution, DispatchError> {
        let violations = self.model.problem.violations(values, VERIFY_TOLERANCE);
        if !violations.is_empty() {
            return Err(DispatchError::InvariantViolation(format!(
                "{} violated rows, first: {}",
                violations.len(),
                violations.iter().take(3).join("; ")
            )));
        }

        let steps = self.records(values);
        let breakdown = self.breakdown(&steps);

        let recomputed = breakdown.weighted_objective();
        let tolerance = BREAKDOWN_ABS_TOLERANCE + BREAKDOWN_REL_TOLERANCE * reported_objective.abs();
        if (recomputed - reported_objective).abs() > tolerance {
            return Err(DispatchError::BreakdownMismatch {
                reported: reported_objective,
                recomputed,
            });
        }

        let simultaneous_exchange_steps: Vec<usize> = steps
            .iter()
            .filter(|s| {
                s.grid_buy_mw.unwrap_or(0.0) > EXCHANGE_FLAG_MW && s.grid_sell_mw.unwrap_or(0.0) > EXCHANGE_FLAG_MW
            })
            .map(|s| s.step)
            .collect();
        if !simultaneous_exchange_steps.is_empty() {
            warn!(
                steps = ?simultaneous_exchange_steps,
                "schedule buys and sells in the same step"
            );
        }

        let metrics = DispatchMetrics::compute(&steps, &breakdown, self.horizon.step_hours());

        Ok(DispatchSolution {
            initial_soc: DispatchModel::value(values, self.model.initial_soc),
            steps,
            breakdown,
            metrics,
            simultaneous_exchange_steps,
        })
    }

    fn records(&self, values: &[f64]) -> Vec<DispatchStep> {
        let power = |var| DispatchModel::value(values, var).map(clean);
        let flag = |var| DispatchModel::value(values, var).map(|v| v > 0.5);

        let mut previously_on = self.resources.thermal.initially_on;
        self.model
            .steps
            .iter()
            .enumerate()
            .map(|(index, vars)| {
                let thermal_on = flag(vars.thermal_on);
                let thermal_started = thermal_on.map(|on| on && !previously_on);
                if let Some(on) = thermal_on {
                    previously_on = on;
                }
                DispatchStep {
                    step: index + 1,
                    timestamp: self.horizon.timestamp(index),
                    demand_mw: self.series.load_mw[index],
                    pv_mw: power(vars.pv),
                    wind_mw: power(vars.wind),
                    thermal_mw: power(vars.thermal),
                    thermal_on,
                    thermal_started,
                    charge_mw: power(vars.charge),
                    discharge_mw: power(vars.discharge),
                    charging: flag(vars.charge_mode),
                    discharging: flag(vars.discharge_mode),
                    soc: DispatchModel::value(values, vars.soc),
                    chiller_mw: power(vars.chiller),
                    heat_pump_mw: power(vars.heat_pump),
                    grid_buy_mw: power(vars.grid_buy),
                    grid_sell_mw: power(vars.grid_sell),
                    frequency_regulation_mw: power(vars.frequency_regulation),
                    spinning_reserve_mw: power(vars.spinning_reserve),
                }
            })
            .collect()
    }

    /// Recomputes every term of the active resources from the schedule alone.
    fn breakdown(&self, steps: &[DispatchStep]) -> CostBreakdown {
        let entries = CostTerm::iter()
            .filter(|term| self.model.capabilities.contains(term.capability()))
            .map(|term| CostEntry {
                term,
                flow: term.flow(),
                amount: steps
                    .iter()
                    .enumerate()
                    .map(|(index, step)| self.step_amount(term, index, step))
                    .sum(),
                weight: self.composed.weight_of(term).unwrap_or(0.0),
            })
            .collect();
        CostBreakdown { entries }
    }

    fn step_amount(&self, term: CostTerm, index: usize, step: &DispatchStep) -> f64 {
        let r = self.resources;
        let dt = self.horizon.step_hours();
        let mw = |value: Option<f64>| value.unwrap_or(0.0) * dt;

        match term {
            CostTerm::PvGeneration => mw(step.pv_mw) * r.pv.variable_cost,
            CostTerm::WindGeneration => mw(step.wind_mw) * r.wind.variable_cost,
            CostTerm::ThermalGeneration => mw(step.thermal_mw) * r.thermal.variable_cost,
            CostTerm::ThermalStartup => {
                let charged = match r.thermal.startup_charging {
                    StartupCharging::PerHourOn => step.thermal_on,
                    StartupCharging::PerStart => step.thermal_started,
                };
                if charged == Some(true) {
                    r.thermal.startup_cost
                } else {
                    0.0
                }
            }
            CostTerm::StorageCharge => mw(step.charge_mw) * r.storage.charge_cost,
            CostTerm::StorageDischarge => mw(step.discharge_mw) * r.storage.discharge_cost,
            CostTerm::ChillerOperation => mw(step.chiller_mw) * r.chiller.operating_cost,
            CostTerm::HeatPumpOperation => mw(step.heat_pump_mw) * r.heat_pump.operating_cost,
            CostTerm::GridPurchase => mw(step.grid_buy_mw) * self.series.buy_price[index],
            CostTerm::GridSale => mw(step.grid_sell_mw) * self.series.sell_price(index, r.grid.sale_price_ratio),
            CostTerm::FrequencyRegulation => mw(step.frequency_regulation_mw) * r.frequency_regulation.price,
            CostTerm::SpinningReserve => mw(step.spinning_reserve_mw) * r.spinning_reserve.price,
        }
    }
}

fn clean(value: f64) -> f64 {
    if value.abs() < ZERO_POWER_MW {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OptimizationObjective, SchedulingMode};
    use crate::optimizer::model::ModelBuilder;
    use crate::optimizer::objective::ObjectiveComposer;

    struct Fixture {
        resources: ResourceConfig,
        horizon: TimeHorizon,
        series: InputSeries,
        model: DispatchModel,
        composed: ComposedObjective,
    }

    fn storage_only_fixture() -> Fixture {
        let resources = ResourceConfig::default();
        let horizon = TimeHorizon::with_steps(2);
        let series = InputSeries::flat(2, 10.0, 100.0);
        let capabilities = SchedulingMode::StorageOnly.capabilities();
        let mut model = ModelBuilder::new(&resources, &horizon, capabilities).build(&series);
        let composed =
            ObjectiveComposer::compose(OptimizationObjective::CostMinimization, capabilities).unwrap();
        let objective = composed.expression(&model, &horizon, &series, &resources);
        model.problem.set_objective(objective);
        Fixture {
            resources,
            horizon,
            series,
            model,
            composed,
        }
    }

    /// Grid covers the load, battery idle at 0.5.
    fn idle_assignment(f: &Fixture) -> Vec<f64> {
        let mut values = vec![0.0; f.model.problem.num_variables()];
        if let Some(initial) = f.model.initial_soc {
            values[initial.index()] = 0.5;
        }
        for vars in &f.model.steps {
            values[vars.soc.unwrap().index()] = 0.5;
            values[vars.grid_buy.unwrap().index()] = 10.0;
        }
        values
    }

    fn extractor(f: &Fixture) -> ResultExtractor<'_> {
        ResultExtractor::new(&f.model, &f.composed, &f.resources, &f.horizon, &f.series)
    }

    #[test]
    fn test_extract_idle_schedule() {
        let f = storage_only_fixture();
        let values = idle_assignment(&f);
        let reported = f.model.problem.objective_value(&values);
        let solution = extractor(&f).extract(reported, &values).unwrap();

        assert_eq!(solution.steps.len(), 2);
        assert_eq!(solution.initial_soc, Some(0.5));
        let first = &solution.steps[0];
        assert_eq!(first.grid_buy_mw, Some(10.0));
        assert_eq!(first.pv_mw, None);
        assert_eq!(first.thermal_on, None);
        assert_eq!(first.charging, Some(false));
        assert_eq!(solution.breakdown.amount(CostTerm::GridPurchase), Some(2000.0));
        assert_eq!(solution.breakdown.amount(CostTerm::PvGeneration), None);
        assert!((solution.breakdown.net_cost() - 2000.0).abs() < 1e-9);
        assert!(solution.simultaneous_exchange_steps.is_empty());
    }

    #[test]
    fn test_objective_mismatch_is_reported() {
        let f = storage_only_fixture();
        let values = idle_assignment(&f);
        let err = extractor(&f).extract(1500.0, &values).unwrap_err();
        match err {
            DispatchError::BreakdownMismatch { reported, recomputed } => {
                assert_eq!(reported, 1500.0);
                assert!((recomputed - 2000.0).abs() < 1e-9);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_unbalanced_assignment_is_invariant_violation() {
        let f = storage_only_fixture();
        let mut values = idle_assignment(&f);
        values[f.model.steps[1].grid_buy.unwrap().index()] = 7.0;
        let reported = f.model.problem.objective_value(&values);
        let err = extractor(&f).extract(reported, &values).unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));
        assert!(err.to_string().contains("power_balance"));
    }

    #[test]
    fn test_simultaneous_exchange_is_flagged() {
        let f = storage_only_fixture();
        let mut values = idle_assignment(&f);
        values[f.model.steps[0].grid_buy.unwrap().index()] = 15.0;
        values[f.model.steps[0].grid_sell.unwrap().index()] = 5.0;
        let reported = f.model.problem.objective_value(&values);
        let solution = extractor(&f).extract(reported, &values).unwrap();
        assert_eq!(solution.simultaneous_exchange_steps, vec![1]);
        assert!((solution.breakdown.amount(CostTerm::GridSale).unwrap() - 475.0).abs() < 1e-9);
    }
}
