use serde::Serialize;

use crate::optimizer::extract::{CostBreakdown, DispatchStep};

/// Technical and economic indicators of a dispatch schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchMetrics {
    pub load_peak_mw: f64,
    pub load_valley_mw: f64,
    pub load_average_mw: f64,
    pub load_energy_mwh: f64,
    /// Average over peak base load.
    pub load_factor: f64,

    pub pv_energy_mwh: f64,
    pub wind_energy_mwh: f64,
    pub thermal_energy_mwh: f64,
    /// Renewable energy over total consumption (base plus adjustable load).
    pub renewable_penetration: f64,

    pub storage_charge_mwh: f64,
    pub storage_discharge_mwh: f64,
    /// Discharged over charged energy; `None` when the battery never charged.
    pub storage_energy_ratio: Option<f64>,

    pub grid_purchase_mwh: f64,
    pub grid_sale_mwh: f64,
    pub net_grid_purchase_mwh: f64,

    pub adjustable_load_mwh: f64,
    pub adjustable_load_share: f64,

    pub ancillary_average_mw: f64,

    /// Local supply over local consumption, capped at 1.
    pub self_sufficiency: f64,
    pub max_power_imbalance_mw: f64,

    pub total_cost: f64,
    pub total_revenue: f64,
    pub net_cost: f64,
    /// Net cost per MWh consumed.
    pub average_cost_per_mwh: f64,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() > f64::EPSILON {
        numerator / denominator
    } else {
        0.0
    }
}

impl DispatchMetrics {
    pub fn compute(steps: &[DispatchStep], breakdown: &CostBreakdown, step_hours: f64) -> Self {
        if steps.is_empty() {
            return Self::default();
        }
        let n = steps.len() as f64;
        let energy = |select: fn(&DispatchStep) -> Option<f64>| -> f64 {
            steps.iter().filter_map(select).sum::<f64>() * step_hours
        };

        let load_peak_mw = steps.iter().map(|s| s.demand_mw).fold(f64::MIN, f64::max);
        let load_valley_mw = steps.iter().map(|s| s.demand_mw).fold(f64::MAX, f64::min);
        let load_average_mw = steps.iter().map(|s| s.demand_mw).sum::<f64>() / n;
        let load_energy_mwh = load_average_mw * n * step_hours;

        let pv_energy_mwh = energy(|s| s.pv_mw);
        let wind_energy_mwh = energy(|s| s.wind_mw);
        let thermal_energy_mwh = energy(|s| s.thermal_mw);
        let storage_charge_mwh = energy(|s| s.charge_mw);
        let storage_discharge_mwh = energy(|s| s.discharge_mw);
        let grid_purchase_mwh = energy(|s| s.grid_buy_mw);
        let grid_sale_mwh = energy(|s| s.grid_sell_mw);
        let adjustable_load_mwh = energy(|s| s.chiller_mw) + energy(|s| s.heat_pump_mw);
        let ancillary_mwh = energy(|s| s.frequency_regulation_mw) + energy(|s| s.spinning_reserve_mw);

        let consumption_mwh = load_energy_mwh + adjustable_load_mwh;
        let local_supply_mwh = pv_energy_mwh + wind_energy_mwh + thermal_energy_mwh + storage_discharge_mwh;
        let local_demand_mwh = consumption_mwh + storage_charge_mwh;

        let net_cost = breakdown.net_cost();

        Self {
            load_peak_mw,
            load_valley_mw,
            load_average_mw,
            load_energy_mwh,
            load_factor: ratio(load_average_mw, load_peak_mw),
            pv_energy_mwh,
            wind_energy_mwh,
            thermal_energy_mwh,
            renewable_penetration: ratio(pv_energy_mwh + wind_energy_mwh, consumption_mwh),
            storage_charge_mwh,
            storage_discharge_mwh,
            storage_energy_ratio: (storage_charge_mwh > 0.0).then(|| storage_discharge_mwh / storage_charge_mwh),
            grid_purchase_mwh,
            grid_sale_mwh,
            net_grid_purchase_mwh: grid_purchase_mwh - grid_sale_mwh,
            adjustable_load_mwh,
            adjustable_load_share: ratio(adjustable_load_mwh, consumption_mwh),
            ancillary_average_mw: ancillary_mwh / (n * step_hours),
            self_sufficiency: ratio(local_supply_mwh, local_demand_mwh).min(1.0),
            max_power_imbalance_mw: steps.iter().map(|s| s.imbalance_mw().abs()).fold(0.0, f64::max),
            total_cost: breakdown.total_cost(),
            total_revenue: breakdown.total_revenue(),
            net_cost,
            average_cost_per_mwh: ratio(net_cost, consumption_mwh),
        }
    }
}
