//! Decision variables and constraints of the VPP dispatch model.
//!
//! Variables are laid out as one [`StepVariables`] record per hour. A resource
//! category that the scheduling mode does not activate has `None` in every
//! record and contributes no row to any constraint.

use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use crate::domain::{
    Capability, CapabilitySet, InputSeries, ResourceConfig, StartupCharging, TimeHorizon,
};
use crate::optimizer::milp::{
    ConstraintGroup, ConstraintTag, LinearConstraint, LinearExpr, MilpProblem, Sense, VarId,
};

/// Variables instantiated for one dispatch step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StepVariables {
    pub pv: Option<VarId>,
    pub wind: Option<VarId>,
    pub thermal: Option<VarId>,
    pub thermal_on: Option<VarId>,
    /// Start indicator; only with per-start charging.
    pub thermal_startup: Option<VarId>,
    pub charge: Option<VarId>,
    pub discharge: Option<VarId>,
    pub charge_mode: Option<VarId>,
    pub discharge_mode: Option<VarId>,
    /// State of charge at the end of the step.
    pub soc: Option<VarId>,
    pub chiller: Option<VarId>,
    pub heat_pump: Option<VarId>,
    pub grid_buy: Option<VarId>,
    pub grid_sell: Option<VarId>,
    pub frequency_regulation: Option<VarId>,
    pub spinning_reserve: Option<VarId>,
}

/// Assembled problem plus the per-step index into its variables.
#[derive(Debug, Clone)]
pub struct DispatchModel {
    pub problem: MilpProblem,
    pub steps: Vec<StepVariables>,
    /// SOC(0), fixed to the configured initial value.
    pub initial_soc: Option<VarId>,
    pub capabilities: CapabilitySet,
}

impl DispatchModel {
    pub fn horizon_len(&self) -> usize {
        self.steps.len()
    }

    pub fn value(values: &[f64], var: Option<VarId>) -> Option<f64> {
        var.map(|v| values[v.index()])
    }
}

fn row(group: ConstraintGroup, step: usize, expr: LinearExpr, sense: Sense, rhs: f64) -> LinearConstraint {
    LinearConstraint {
        tag: ConstraintTag::new(group, step),
        expr,
        sense,
        rhs,
    }
}

pub struct ModelBuilder<'a> {
    resources: &'a ResourceConfig,
    horizon: &'a TimeHorizon,
    capabilities: CapabilitySet,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(resources: &'a ResourceConfig, horizon: &'a TimeHorizon, capabilities: CapabilitySet) -> Self {
        Self {
            resources,
            horizon,
            capabilities,
        }
    }

    fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Builds the model for `series`. Never fails: data that makes the model
    /// infeasible is reported by the solver.
    pub fn build(&self, series: &InputSeries) -> DispatchModel {
        let mut problem = MilpProblem::new();

        let initial_soc = self.has(Capability::Storage).then(|| {
            let soc = self.resources.storage.initial_soc;
            problem.add_continuous("soc[0]", soc, soc)
        });

        let steps: Vec<StepVariables> = (0..self.horizon.steps)
            .map(|index| self.declare_step(&mut problem, index, series))
            .collect();

        let local: Vec<LinearConstraint> = steps
            .iter()
            .enumerate()
            .flat_map(|(index, vars)| self.step_constraints(index, vars, series))
            .collect();
        problem.extend_constraints(local);

        self.add_ramp_limits(&mut problem, &steps);
        self.add_storage_dynamics(&mut problem, &steps, initial_soc);
        self.add_startup_transitions(&mut problem, &steps);

        debug!(
            steps = steps.len(),
            variables = problem.num_variables(),
            binaries = problem.binary_indices().len(),
            constraints = problem.constraints().len(),
            "dispatch model built"
        );

        DispatchModel {
            problem,
            steps,
            initial_soc,
            capabilities: self.capabilities,
        }
    }

    fn declare_step(&self, problem: &mut MilpProblem, index: usize, series: &InputSeries) -> StepVariables {
        let r = self.resources;
        let s = index + 1;
        let mut vars = StepVariables::default();

        if self.has(Capability::Renewable) {
            let pv_cap = r.pv.capacity_mw * series.pv_capacity_factor[index];
            let wind_cap = r.wind.capacity_mw * series.wind_capacity_factor[index];
            vars.pv = Some(problem.add_continuous(format!("pv[{s}]"), 0.0, pv_cap));
            vars.wind = Some(problem.add_continuous(format!("wind[{s}]"), 0.0, wind_cap));
        }

        if self.has(Capability::Thermal) {
            vars.thermal = Some(problem.add_continuous(
                format!("thermal[{s}]"),
                0.0,
                r.thermal.max_output_mw(),
            ));
            vars.thermal_on = Some(problem.add_binary(format!("thermal_on[{s}]")));
            if r.thermal.startup_charging == StartupCharging::PerStart {
                vars.thermal_startup = Some(problem.add_continuous(format!("thermal_start[{s}]"), 0.0, 1.0));
            }
        }

        if self.has(Capability::Storage) {
            let storage = &r.storage;
            vars.charge = Some(problem.add_continuous(format!("charge[{s}]"), 0.0, storage.power_mw));
            vars.discharge = Some(problem.add_continuous(format!("discharge[{s}]"), 0.0, storage.power_mw));
            vars.charge_mode = Some(problem.add_binary(format!("charge_mode[{s}]")));
            vars.discharge_mode = Some(problem.add_binary(format!("discharge_mode[{s}]")));
            vars.soc = Some(problem.add_continuous(format!("soc[{s}]"), storage.min_soc, storage.max_soc));
        }

        if self.has(Capability::AdjustableLoad) {
            vars.chiller = Some(problem.add_continuous(
                format!("chiller[{s}]"),
                r.chiller.min_mw(),
                r.chiller.max_mw(),
            ));
            vars.heat_pump = Some(problem.add_continuous(
                format!("heat_pump[{s}]"),
                r.heat_pump.min_mw(),
                r.heat_pump.max_mw(),
            ));
        }

        if self.has(Capability::Grid) {
            vars.grid_buy = Some(problem.add_continuous(format!("grid_buy[{s}]"), 0.0, r.grid.max_purchase_mw));
            vars.grid_sell = Some(problem.add_continuous(format!("grid_sell[{s}]"), 0.0, r.grid.max_sale_mw));
        }

        if self.has(Capability::Ancillary) {
            vars.frequency_regulation = Some(problem.add_continuous(
                format!("frequency_regulation[{s}]"),
                0.0,
                r.frequency_regulation.max_capacity_mw,
            ));
            vars.spinning_reserve = Some(problem.add_continuous(
                format!("spinning_reserve[{s}]"),
                0.0,
                r.spinning_reserve.max_capacity_mw,
            ));
        }

        vars
    }

    /// Rows that only involve variables of a single step.
    fn step_constraints(&self, index: usize, vars: &StepVariables, series: &InputSeries) -> Vec<LinearConstraint> {
        let r = self.resources;
        let s = index + 1;
        let mut rows = Vec::new();

        // supply - withdrawals = base load
        let balance = LinearExpr::new()
            .plus_opt(vars.pv, 1.0)
            .plus_opt(vars.wind, 1.0)
            .plus_opt(vars.thermal, 1.0)
            .plus_opt(vars.discharge, 1.0)
            .plus_opt(vars.grid_buy, 1.0)
            .plus_opt(vars.chiller, -1.0)
            .plus_opt(vars.heat_pump, -1.0)
            .plus_opt(vars.charge, -1.0)
            .plus_opt(vars.grid_sell, -1.0);
        rows.push(row(ConstraintGroup::PowerBalance, s, balance, Sense::Eq, series.load_mw[index]));

        if let (Some(output), Some(on)) = (vars.thermal, vars.thermal_on) {
            rows.push(row(
                ConstraintGroup::ThermalMaxOutput,
                s,
                LinearExpr::new().plus(output, 1.0).plus(on, -r.thermal.max_output_mw()),
                Sense::Le,
                0.0,
            ));
            rows.push(row(
                ConstraintGroup::ThermalMinOutput,
                s,
                LinearExpr::new().plus(output, 1.0).plus(on, -r.thermal.min_output_mw()),
                Sense::Ge,
                0.0,
            ));
        }

        if let (Some(charge), Some(discharge), Some(charge_mode), Some(discharge_mode)) =
            (vars.charge, vars.discharge, vars.charge_mode, vars.discharge_mode)
        {
            let power = r.storage.power_mw;
            rows.push(row(
                ConstraintGroup::ChargeLimit,
                s,
                LinearExpr::new().plus(charge, 1.0).plus(charge_mode, -power),
                Sense::Le,
                0.0,
            ));
            rows.push(row(
                ConstraintGroup::DischargeLimit,
                s,
                LinearExpr::new().plus(discharge, 1.0).plus(discharge_mode, -power),
                Sense::Le,
                0.0,
            ));
            rows.push(row(
                ConstraintGroup::StorageModeExclusion,
                s,
                LinearExpr::new().plus(charge_mode, 1.0).plus(discharge_mode, 1.0),
                Sense::Le,
                1.0,
            ));
        }

        if vars.frequency_regulation.is_some() || vars.spinning_reserve.is_some() {
            // reserved capacity must fit in the battery's unused power
            let headroom = if vars.discharge.is_some() { r.storage.power_mw } else { 0.0 };
            rows.push(row(
                ConstraintGroup::AncillaryDischargeHeadroom,
                s,
                LinearExpr::new()
                    .plus_opt(vars.discharge, 1.0)
                    .plus_opt(vars.frequency_regulation, 1.0)
                    .plus_opt(vars.spinning_reserve, 1.0),
                Sense::Le,
                headroom,
            ));
            if let (Some(charge), Some(regulation)) = (vars.charge, vars.frequency_regulation) {
                rows.push(row(
                    ConstraintGroup::AncillaryChargeHeadroom,
                    s,
                    LinearExpr::new().plus(charge, 1.0).plus(regulation, 1.0),
                    Sense::Le,
                    headroom,
                ));
            }
        }

        rows
    }

    fn add_ramp_limits(&self, problem: &mut MilpProblem, steps: &[StepVariables]) {
        let ramp = self.resources.thermal.ramp_mw_per_h * self.horizon.step_hours();
        for ((_, prev), (index, cur)) in steps.iter().enumerate().tuple_windows() {
            let (Some(before), Some(after)) = (prev.thermal, cur.thermal) else {
                continue;
            };
            let delta = LinearExpr::new().plus(after, 1.0).plus(before, -1.0);
            problem.add_constraint(
                ConstraintTag::new(ConstraintGroup::RampUp, index + 1),
                delta.clone(),
                Sense::Le,
                ramp,
            );
            problem.add_constraint(
                ConstraintTag::new(ConstraintGroup::RampDown, index + 1),
                delta,
                Sense::Ge,
                -ramp,
            );
        }
    }

    fn add_storage_dynamics(&self, problem: &mut MilpProblem, steps: &[StepVariables], initial_soc: Option<VarId>) {
        let Some(initial) = initial_soc else {
            return;
        };
        let storage = &self.resources.storage;
        let dt = self.horizon.step_hours();
        let charge_gain = storage.charge_efficiency * dt / storage.energy_mwh;
        let discharge_drain = dt / (storage.discharge_efficiency * storage.energy_mwh);
        let retention = storage.retention(dt);

        let mut previous = initial;
        for (index, vars) in steps.iter().enumerate() {
            let (Some(soc), Some(charge), Some(discharge)) = (vars.soc, vars.charge, vars.discharge) else {
                continue;
            };
            // SOC(t) - retention * SOC(t-1) - gain * charge(t) + drain * discharge(t) = 0
            problem.add_constraint(
                ConstraintTag::new(ConstraintGroup::StateOfCharge, index + 1),
                LinearExpr::new()
                    .plus(soc, 1.0)
                    .plus(previous, -retention)
                    .plus(charge, -charge_gain)
                    .plus(discharge, discharge_drain),
                Sense::Eq,
                0.0,
            );
            previous = soc;
        }

        if storage.balanced && previous != initial {
            problem.add_constraint(
                ConstraintTag::new(ConstraintGroup::StorageBalance, steps.len()),
                LinearExpr::new().plus(previous, 1.0).plus(initial, -1.0),
                Sense::Eq,
                0.0,
            );
        }
    }

    fn add_startup_transitions(&self, problem: &mut MilpProblem, steps: &[StepVariables]) {
        let initially_on = if self.resources.thermal.initially_on { 1.0 } else { 0.0 };
        let mut previous_on: Option<VarId> = None;
        for (index, vars) in steps.iter().enumerate() {
            let (Some(start), Some(on)) = (vars.thermal_startup, vars.thermal_on) else {
                continue;
            };
            // y(t) >= u(t) - u(t-1)
            let mut expr = LinearExpr::new().plus(start, 1.0).plus(on, -1.0);
            let rhs = match previous_on {
                Some(prev) => {
                    expr.add_term(prev, 1.0);
                    0.0
                }
                None => -initially_on,
            };
            problem.add_constraint(
                ConstraintTag::new(ConstraintGroup::StartupTransition, index + 1),
                expr,
                Sense::Ge,
                rhs,
            );
            previous_on = Some(on);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SchedulingMode;
    use enumset::enum_set;

    fn build(mode: SchedulingMode, steps: usize) -> DispatchModel {
        let resources = ResourceConfig::default();
        let horizon = TimeHorizon::with_steps(steps);
        let series = InputSeries::flat(steps, 40.0, 300.0);
        ModelBuilder::new(&resources, &horizon, mode.capabilities()).build(&series)
    }

    fn count(model: &DispatchModel, group: ConstraintGroup) -> usize {
        model
            .problem
            .constraints()
            .iter()
            .filter(|c| c.tag.group == group)
            .count()
    }

    #[test]
    fn test_storage_only_omits_generation_and_loads() {
        let model = build(SchedulingMode::StorageOnly, 4);
        for vars in &model.steps {
            assert!(vars.pv.is_none() && vars.wind.is_none() && vars.thermal.is_none());
            assert!(vars.thermal_on.is_none());
            assert!(vars.chiller.is_none() && vars.heat_pump.is_none());
            assert!(vars.frequency_regulation.is_none());
            assert!(vars.charge.is_some() && vars.soc.is_some() && vars.grid_buy.is_some());
        }
        assert_eq!(count(&model, ConstraintGroup::RampUp), 0);
    }

    #[test]
    fn test_full_system_row_counts() {
        let model = build(SchedulingMode::FullSystem, 24);
        assert_eq!(count(&model, ConstraintGroup::PowerBalance), 24);
        assert_eq!(count(&model, ConstraintGroup::StateOfCharge), 24);
        assert_eq!(count(&model, ConstraintGroup::StorageBalance), 1);
        assert_eq!(count(&model, ConstraintGroup::RampUp), 23);
        assert_eq!(count(&model, ConstraintGroup::RampDown), 23);
        assert_eq!(count(&model, ConstraintGroup::StorageModeExclusion), 24);
        assert_eq!(count(&model, ConstraintGroup::AncillaryDischargeHeadroom), 24);
        assert_eq!(count(&model, ConstraintGroup::StartupTransition), 0);
        // thermal_on, charge_mode and discharge_mode per step
        assert_eq!(model.problem.binary_indices().len(), 72);
    }

    #[test]
    fn test_renewable_bounds_follow_capacity_factor() {
        let resources = ResourceConfig::default();
        let horizon = TimeHorizon::with_steps(2);
        let mut series = InputSeries::flat(2, 40.0, 300.0);
        series.pv_capacity_factor = vec![0.0, 0.5];
        series.wind_capacity_factor = vec![1.0, 0.25];
        let model = ModelBuilder::new(&resources, &horizon, SchedulingMode::RenewableStorage.capabilities())
            .build(&series);

        let upper = |var: Option<VarId>| var.map(|v| model.problem.variable(v).upper);
        assert_eq!(upper(model.steps[0].pv), Some(0.0));
        assert_eq!(upper(model.steps[1].pv), Some(25.0));
        assert_eq!(upper(model.steps[0].wind), Some(30.0));
        assert_eq!(upper(model.steps[1].wind), Some(7.5));
    }

    #[test]
    fn test_initial_soc_is_fixed() {
        let model = build(SchedulingMode::StorageOnly, 1);
        let initial = model.initial_soc.map(|v| model.problem.variable(v).clone());
        let initial = initial.unwrap();
        assert_eq!(initial.lower, 0.5);
        assert_eq!(initial.upper, 0.5);
    }

    #[test]
    fn test_per_start_charging_adds_transition_rows() {
        let mut resources = ResourceConfig::default();
        resources.thermal.startup_charging = StartupCharging::PerStart;
        let horizon = TimeHorizon::with_steps(3);
        let series = InputSeries::flat(3, 40.0, 300.0);
        let model = ModelBuilder::new(&resources, &horizon, enum_set!(Capability::Thermal | Capability::Grid))
            .build(&series);
        assert_eq!(count(&model, ConstraintGroup::StartupTransition), 3);
        assert!(model.steps.iter().all(|v| v.thermal_startup.is_some()));
    }

    #[test]
    fn test_soc_row_coefficients() {
        let mut resources = ResourceConfig::default();
        resources.storage.self_discharge_per_h = 0.02;
        let horizon = TimeHorizon::with_steps(2);
        let series = InputSeries::flat(2, 40.0, 300.0);
        let model = ModelBuilder::new(&resources, &horizon, SchedulingMode::StorageOnly.capabilities())
            .build(&series);

        let row = model
            .problem
            .constraints()
            .iter()
            .find(|c| c.tag == ConstraintTag::new(ConstraintGroup::StateOfCharge, 2))
            .unwrap();
        let coef = |var: Option<VarId>| {
            let var = var.unwrap();
            row.expr.terms().iter().find(|(v, _)| *v == var).map(|(_, c)| *c).unwrap()
        };
        let (first, second) = (model.steps[0], model.steps[1]);
        assert_eq!(coef(second.soc), 1.0);
        assert!((coef(first.soc) + 0.98).abs() < 1e-12);
        assert!((coef(second.charge) + 0.95 / 200.0).abs() < 1e-12);
        assert!((coef(second.discharge) - 1.0 / (0.95 * 200.0)).abs() < 1e-12);
        assert_eq!(row.sense, Sense::Eq);
    }

    #[test]
    fn test_unbalanced_storage_has_no_terminal_row() {
        let mut resources = ResourceConfig::default();
        resources.storage.balanced = false;
        let horizon = TimeHorizon::with_steps(3);
        let series = InputSeries::flat(3, 40.0, 300.0);
        let model = ModelBuilder::new(&resources, &horizon, SchedulingMode::StorageOnly.capabilities())
            .build(&series);
        assert_eq!(count(&model, ConstraintGroup::StorageBalance), 0);
    }
}
