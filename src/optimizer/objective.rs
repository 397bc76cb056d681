//! Objective composition: named, signed, weighted cost and revenue terms.

use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::debug;

use crate::domain::{
    Capability, CapabilitySet, InputSeries, OptimizationObjective, ResourceConfig, StartupCharging,
    TimeHorizon,
};
use crate::error::DispatchError;
use crate::optimizer::milp::{LinearExpr, VarId};
use crate::optimizer::model::{DispatchModel, StepVariables};

/// Whether a term is money spent or money earned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlow {
    Cost,
    Revenue,
}

impl CashFlow {
    /// Sign of the term in a minimised objective.
    pub fn sign(self) -> f64 {
        match self {
            CashFlow::Cost => 1.0,
            CashFlow::Revenue => -1.0,
        }
    }
}

/// Groups of terms that share a weight within an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TermFamily {
    VariableGeneration,
    Startup,
    Storage,
    AdjustableLoad,
    GridPurchase,
    GridSale,
    Ancillary,
}

/// Every cost or revenue stream the dispatch can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CostTerm {
    PvGeneration,
    WindGeneration,
    ThermalGeneration,
    ThermalStartup,
    StorageCharge,
    StorageDischarge,
    ChillerOperation,
    HeatPumpOperation,
    GridPurchase,
    GridSale,
    FrequencyRegulation,
    SpinningReserve,
}

impl CostTerm {
    pub fn flow(self) -> CashFlow {
        match self {
            CostTerm::GridSale | CostTerm::FrequencyRegulation | CostTerm::SpinningReserve => CashFlow::Revenue,
            _ => CashFlow::Cost,
        }
    }

    pub fn capability(self) -> Capability {
        match self {
            CostTerm::PvGeneration | CostTerm::WindGeneration => Capability::Renewable,
            CostTerm::ThermalGeneration | CostTerm::ThermalStartup => Capability::Thermal,
            CostTerm::StorageCharge | CostTerm::StorageDischarge => Capability::Storage,
            CostTerm::ChillerOperation | CostTerm::HeatPumpOperation => Capability::AdjustableLoad,
            CostTerm::GridPurchase | CostTerm::GridSale => Capability::Grid,
            CostTerm::FrequencyRegulation | CostTerm::SpinningReserve => Capability::Ancillary,
        }
    }

    pub fn family(self) -> TermFamily {
        match self {
            CostTerm::PvGeneration | CostTerm::WindGeneration | CostTerm::ThermalGeneration => {
                TermFamily::VariableGeneration
            }
            CostTerm::ThermalStartup => TermFamily::Startup,
            CostTerm::StorageCharge | CostTerm::StorageDischarge => TermFamily::Storage,
            CostTerm::ChillerOperation | CostTerm::HeatPumpOperation => TermFamily::AdjustableLoad,
            CostTerm::GridPurchase => TermFamily::GridPurchase,
            CostTerm::GridSale => TermFamily::GridSale,
            CostTerm::FrequencyRegulation | CostTerm::SpinningReserve => TermFamily::Ancillary,
        }
    }

    /// Variable and per-MW coefficient of the term at one step, before sign and weight.
    ///
    /// `None` when the variable is not instantiated.
    pub fn coefficient(
        self,
        vars: &StepVariables,
        index: usize,
        series: &InputSeries,
        resources: &ResourceConfig,
        dt: f64,
    ) -> Option<(VarId, f64)> {
        match self {
            CostTerm::PvGeneration => vars.pv.map(|v| (v, resources.pv.variable_cost * dt)),
            CostTerm::WindGeneration => vars.wind.map(|v| (v, resources.wind.variable_cost * dt)),
            CostTerm::ThermalGeneration => vars.thermal.map(|v| (v, resources.thermal.variable_cost * dt)),
            CostTerm::ThermalStartup => {
                let var = match resources.thermal.startup_charging {
                    StartupCharging::PerHourOn => vars.thermal_on,
                    StartupCharging::PerStart => vars.thermal_startup,
                };
                var.map(|v| (v, resources.thermal.startup_cost))
            }
            CostTerm::StorageCharge => vars.charge.map(|v| (v, resources.storage.charge_cost * dt)),
            CostTerm::StorageDischarge => vars.discharge.map(|v| (v, resources.storage.discharge_cost * dt)),
            CostTerm::ChillerOperation => vars.chiller.map(|v| (v, resources.chiller.operating_cost * dt)),
            CostTerm::HeatPumpOperation => vars.heat_pump.map(|v| (v, resources.heat_pump.operating_cost * dt)),
            CostTerm::GridPurchase => vars.grid_buy.map(|v| (v, series.buy_price[index] * dt)),
            CostTerm::GridSale => vars
                .grid_sell
                .map(|v| (v, series.sell_price(index, resources.grid.sale_price_ratio) * dt)),
            CostTerm::FrequencyRegulation => vars
                .frequency_regulation
                .map(|v| (v, resources.frequency_regulation.price * dt)),
            CostTerm::SpinningReserve => vars
                .spinning_reserve
                .map(|v| (v, resources.spinning_reserve.price * dt)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Skipped when the resource is inactive.
    IfActive,
    /// The objective is meaningless without the resource.
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FamilyWeight {
    pub family: TermFamily,
    pub weight: f64,
    pub requirement: Requirement,
}

const fn optional(family: TermFamily, weight: f64) -> FamilyWeight {
    FamilyWeight {
        family,
        weight,
        requirement: Requirement::IfActive,
    }
}

const fn required(family: TermFamily, weight: f64) -> FamilyWeight {
    FamilyWeight {
        family,
        weight,
        requirement: Requirement::Required,
    }
}

/// Families weighted by each objective. Families not listed are dropped.
///
/// Every cost family, grid purchase included, shares the objective's cost
/// scale. Revenues keep weight 1 except ancillary capacity, which
/// `ancillary_revenue_max` doubles.
pub fn family_weights(objective: OptimizationObjective) -> Vec<FamilyWeight> {
    use TermFamily::*;

    match objective {
        OptimizationObjective::CostMinimization | OptimizationObjective::ProfitMaximization => vec![
            optional(VariableGeneration, 1.0),
            optional(Startup, 1.0),
            optional(Storage, 1.0),
            optional(AdjustableLoad, 1.0),
            optional(GridPurchase, 1.0),
            optional(GridSale, 1.0),
            optional(Ancillary, 1.0),
        ],
        // variable generation cost is sunk once the asset is built
        OptimizationObjective::RevenueMaximization => vec![
            optional(Startup, 1.0),
            optional(Storage, 1.0),
            optional(AdjustableLoad, 1.0),
            optional(GridPurchase, 1.0),
            optional(GridSale, 1.0),
            optional(Ancillary, 1.0),
        ],
        OptimizationObjective::AncillaryRevenueMax => vec![
            optional(VariableGeneration, 0.1),
            optional(Startup, 0.1),
            optional(Storage, 0.1),
            optional(AdjustableLoad, 0.1),
            optional(GridPurchase, 0.1),
            optional(GridSale, 1.0),
            required(Ancillary, 2.0),
        ],
        OptimizationObjective::GridSupportOptimized => vec![
            optional(VariableGeneration, 0.5),
            optional(Startup, 0.5),
            optional(Storage, 0.5),
            optional(AdjustableLoad, 0.5),
            optional(GridPurchase, 0.5),
            optional(GridSale, 1.0),
            optional(Ancillary, 1.0),
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightedTerm {
    pub term: CostTerm,
    pub weight: f64,
}

impl WeightedTerm {
    /// Weight with the cost/revenue sign applied.
    pub fn signed_weight(&self) -> f64 {
        self.term.flow().sign() * self.weight
    }
}

/// Objective restricted to the terms whose resources are active.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedObjective {
    pub objective: OptimizationObjective,
    pub terms: Vec<WeightedTerm>,
}

impl ComposedObjective {
    pub fn weight_of(&self, term: CostTerm) -> Option<f64> {
        self.terms.iter().find(|t| t.term == term).map(|t| t.weight)
    }

    /// Linear objective over the model's variables.
    pub fn expression(
        &self,
        model: &DispatchModel,
        horizon: &TimeHorizon,
        series: &InputSeries,
        resources: &ResourceConfig,
    ) -> LinearExpr {
        let dt = horizon.step_hours();
        let mut expr = LinearExpr::new();
        for weighted in &self.terms {
            let signed = weighted.signed_weight();
            for (index, vars) in model.steps.iter().enumerate() {
                if let Some((var, coef)) = weighted.term.coefficient(vars, index, series, resources, dt) {
                    expr.add_term(var, signed * coef);
                }
            }
        }
        expr
    }
}

pub struct ObjectiveComposer;

impl ObjectiveComposer {
    /// Selects and weights the terms of `objective` that `capabilities` can support.
    ///
    /// Fails before any model is built when a required term's resource is inactive.
    pub fn compose(
        objective: OptimizationObjective,
        capabilities: CapabilitySet,
    ) -> Result<ComposedObjective, DispatchError> {
        let weights = family_weights(objective);
        let mut terms = Vec::new();

        for term in CostTerm::iter() {
            let Some(family) = weights.iter().find(|w| w.family == term.family()) else {
                continue;
            };
            if family.weight == 0.0 {
                continue;
            }
            if !capabilities.contains(term.capability()) {
                if family.requirement == Requirement::Required {
                    return Err(DispatchError::Configuration(format!(
                        "objective {objective} requires the {} term, but {} resources are inactive in this mode",
                        term,
                        term.capability()
                    )));
                }
                continue;
            }
            terms.push(WeightedTerm {
                term,
                weight: family.weight,
            });
        }

        debug!(%objective, terms = terms.len(), "objective composed");
        Ok(ComposedObjective { objective, terms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SchedulingMode;
    use crate::optimizer::model::ModelBuilder;
    use rstest::rstest;

    fn terms(composed: &ComposedObjective) -> Vec<CostTerm> {
        composed.terms.iter().map(|t| t.term).collect()
    }

    #[test]
    fn test_storage_only_cost_minimization_terms() {
        let composed = ObjectiveComposer::compose(
            OptimizationObjective::CostMinimization,
            SchedulingMode::StorageOnly.capabilities(),
        )
        .unwrap();
        assert_eq!(
            terms(&composed),
            vec![
                CostTerm::StorageCharge,
                CostTerm::StorageDischarge,
                CostTerm::GridPurchase,
                CostTerm::GridSale,
            ]
        );
    }

    #[test]
    fn test_revenue_maximization_drops_variable_generation() {
        let composed = ObjectiveComposer::compose(
            OptimizationObjective::RevenueMaximization,
            SchedulingMode::FullSystem.capabilities(),
        )
        .unwrap();
        let selected = terms(&composed);
        assert!(!selected.contains(&CostTerm::PvGeneration));
        assert!(!selected.contains(&CostTerm::ThermalGeneration));
        assert!(selected.contains(&CostTerm::ThermalStartup));
        assert!(selected.contains(&CostTerm::FrequencyRegulation));
    }

    #[rstest]
    #[case(SchedulingMode::RenewableStorage)]
    #[case(SchedulingMode::AdjustableStorage)]
    #[case(SchedulingMode::Traditional)]
    #[case(SchedulingMode::NoRenewable)]
    #[case(SchedulingMode::StorageOnly)]
    fn test_ancillary_objective_requires_ancillary_mode(#[case] mode: SchedulingMode) {
        let err = ObjectiveComposer::compose(OptimizationObjective::AncillaryRevenueMax, mode.capabilities())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("ancillary_revenue_max"));
    }

    #[rstest]
    #[case::cost(OptimizationObjective::CostMinimization, Some(1.0), 1.0, 1.0, 1.0)]
    #[case::revenue(OptimizationObjective::RevenueMaximization, None, 1.0, 1.0, 1.0)]
    #[case::profit(OptimizationObjective::ProfitMaximization, Some(1.0), 1.0, 1.0, 1.0)]
    #[case::ancillary(OptimizationObjective::AncillaryRevenueMax, Some(0.1), 0.1, 0.1, 2.0)]
    #[case::grid_support(OptimizationObjective::GridSupportOptimized, Some(0.5), 0.5, 0.5, 1.0)]
    fn test_weights_per_objective(
        #[case] objective: OptimizationObjective,
        #[case] generation: Option<f64>,
        #[case] cost_scale: f64,
        #[case] grid_purchase: f64,
        #[case] ancillary: f64,
    ) {
        let composed = ObjectiveComposer::compose(objective, SchedulingMode::FullSystem.capabilities()).unwrap();

        assert_eq!(composed.weight_of(CostTerm::PvGeneration), generation);
        assert_eq!(composed.weight_of(CostTerm::ThermalGeneration), generation);
        for term in [
            CostTerm::ThermalStartup,
            CostTerm::StorageCharge,
            CostTerm::StorageDischarge,
            CostTerm::ChillerOperation,
        ] {
            assert_eq!(composed.weight_of(term), Some(cost_scale), "{term}");
        }
        assert_eq!(composed.weight_of(CostTerm::GridPurchase), Some(grid_purchase));
        assert_eq!(composed.weight_of(CostTerm::GridSale), Some(1.0));
        assert_eq!(composed.weight_of(CostTerm::FrequencyRegulation), Some(ancillary));
        assert_eq!(composed.weight_of(CostTerm::SpinningReserve), Some(ancillary));
    }

    #[test]
    fn test_grid_support_skips_inactive_ancillary() {
        let composed = ObjectiveComposer::compose(
            OptimizationObjective::GridSupportOptimized,
            SchedulingMode::Traditional.capabilities(),
        )
        .unwrap();
        assert_eq!(composed.weight_of(CostTerm::ThermalGeneration), Some(0.5));
        assert_eq!(composed.weight_of(CostTerm::FrequencyRegulation), None);
    }

    #[test]
    fn test_revenue_terms_enter_with_negative_sign() {
        let composed = ObjectiveComposer::compose(
            OptimizationObjective::AncillaryRevenueMax,
            SchedulingMode::FullSystem.capabilities(),
        )
        .unwrap();
        let regulation = composed
            .terms
            .iter()
            .find(|t| t.term == CostTerm::FrequencyRegulation)
            .unwrap();
        assert_eq!(regulation.signed_weight(), -2.0);
        let storage = composed
            .terms
            .iter()
            .find(|t| t.term == CostTerm::StorageCharge)
            .unwrap();
        assert!((storage.signed_weight() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_expression_coefficients() {
        let resources = ResourceConfig::default();
        let horizon = TimeHorizon::with_steps(2);
        let series = InputSeries::flat(2, 10.0, 100.0);
        let model = ModelBuilder::new(&resources, &horizon, SchedulingMode::StorageOnly.capabilities())
            .build(&series);
        let composed = ObjectiveComposer::compose(
            OptimizationObjective::CostMinimization,
            SchedulingMode::StorageOnly.capabilities(),
        )
        .unwrap();
        let expr = composed.expression(&model, &horizon, &series, &resources);

        let coef = |var: Option<VarId>| {
            let var = var.unwrap();
            expr.terms()
                .iter()
                .filter(|(v, _)| *v == var)
                .map(|(_, c)| c)
                .sum::<f64>()
        };
        assert_eq!(coef(model.steps[0].grid_buy), 100.0);
        assert!((coef(model.steps[1].grid_sell) + 95.0).abs() < 1e-9);
        assert_eq!(coef(model.steps[0].charge), 10.0);
        assert_eq!(coef(model.steps[1].discharge), 15.0);
    }
}
