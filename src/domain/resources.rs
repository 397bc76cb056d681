use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::DispatchError;

/// Static technical and economic parameters of every resource the VPP can dispatch.
///
/// Loaded once with the configuration and read-only for the lifetime of a run.
/// Costs are in currency per MWh (per MW-hour for ancillary capacity), powers in MW.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    #[validate(nested)]
    pub pv: RenewableUnit,
    #[validate(nested)]
    pub wind: RenewableUnit,
    #[validate(nested)]
    pub thermal: ThermalUnit,
    #[validate(nested)]
    pub storage: StorageUnit,
    #[validate(nested)]
    pub chiller: AdjustableLoad,
    #[validate(nested)]
    pub heat_pump: AdjustableLoad,
    #[validate(nested)]
    pub grid: GridConnection,
    #[validate(nested)]
    pub frequency_regulation: AncillaryProduct,
    #[validate(nested)]
    pub spinning_reserve: AncillaryProduct,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            pv: RenewableUnit {
                capacity_mw: 50.0,
                variable_cost: 5.0,
            },
            wind: RenewableUnit {
                capacity_mw: 30.0,
                variable_cost: 8.0,
            },
            thermal: ThermalUnit::default(),
            storage: StorageUnit::default(),
            chiller: AdjustableLoad {
                rated_mw: 20.0,
                min_ratio: 0.3,
                max_ratio: 1.0,
                operating_cost: 50.0,
            },
            heat_pump: AdjustableLoad {
                rated_mw: 15.0,
                min_ratio: 0.2,
                max_ratio: 1.0,
                operating_cost: 40.0,
            },
            grid: GridConnection::default(),
            frequency_regulation: AncillaryProduct {
                max_capacity_mw: 20.0,
                price: 80.0,
            },
            spinning_reserve: AncillaryProduct {
                max_capacity_mw: 15.0,
                price: 60.0,
            },
        }
    }
}

impl ResourceConfig {
    /// Field ranges plus the cross-field checks the derive cannot express.
    pub fn ensure_valid(&self) -> Result<(), DispatchError> {
        self.validate()?;

        for (name, value) in self.numeric_fields() {
            if !value.is_finite() {
                return Err(DispatchError::Validation(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }

        let thermal = &self.thermal;
        ordered(
            "thermal.min_output_ratio",
            thermal.min_output_ratio,
            "thermal.max_output_ratio",
            thermal.max_output_ratio,
        )?;

        let storage = &self.storage;
        ordered("storage.min_soc", storage.min_soc, "storage.max_soc", storage.max_soc)?;
        if storage.initial_soc < storage.min_soc || storage.initial_soc > storage.max_soc {
            return Err(DispatchError::Validation(format!(
                "storage.initial_soc {} outside [{}, {}]",
                storage.initial_soc, storage.min_soc, storage.max_soc
            )));
        }
        if storage.energy_mwh <= 0.0 {
            return Err(DispatchError::Validation(
                "storage.energy_mwh must be positive".to_string(),
            ));
        }
        if storage.charge_efficiency <= 0.0 || storage.discharge_efficiency <= 0.0 {
            return Err(DispatchError::Validation(
                "storage efficiencies must be in (0, 1]".to_string(),
            ));
        }

        ordered(
            "chiller.min_ratio",
            self.chiller.min_ratio,
            "chiller.max_ratio",
            self.chiller.max_ratio,
        )?;
        ordered(
            "heat_pump.min_ratio",
            self.heat_pump.min_ratio,
            "heat_pump.max_ratio",
            self.heat_pump.max_ratio,
        )?;

        Ok(())
    }

    fn numeric_fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("pv.capacity_mw", self.pv.capacity_mw),
            ("pv.variable_cost", self.pv.variable_cost),
            ("wind.capacity_mw", self.wind.capacity_mw),
            ("wind.variable_cost", self.wind.variable_cost),
            ("thermal.capacity_mw", self.thermal.capacity_mw),
            ("thermal.min_output_ratio", self.thermal.min_output_ratio),
            ("thermal.max_output_ratio", self.thermal.max_output_ratio),
            ("thermal.ramp_mw_per_h", self.thermal.ramp_mw_per_h),
            ("thermal.variable_cost", self.thermal.variable_cost),
            ("thermal.startup_cost", self.thermal.startup_cost),
            ("storage.power_mw", self.storage.power_mw),
            ("storage.energy_mwh", self.storage.energy_mwh),
            ("storage.charge_efficiency", self.storage.charge_efficiency),
            ("storage.discharge_efficiency", self.storage.discharge_efficiency),
            ("storage.initial_soc", self.storage.initial_soc),
            ("storage.min_soc", self.storage.min_soc),
            ("storage.max_soc", self.storage.max_soc),
            ("storage.charge_cost", self.storage.charge_cost),
            ("storage.discharge_cost", self.storage.discharge_cost),
            ("storage.self_discharge_per_h", self.storage.self_discharge_per_h),
            ("chiller.rated_mw", self.chiller.rated_mw),
            ("chiller.min_ratio", self.chiller.min_ratio),
            ("chiller.max_ratio", self.chiller.max_ratio),
            ("chiller.operating_cost", self.chiller.operating_cost),
            ("heat_pump.rated_mw", self.heat_pump.rated_mw),
            ("heat_pump.min_ratio", self.heat_pump.min_ratio),
            ("heat_pump.max_ratio", self.heat_pump.max_ratio),
            ("heat_pump.operating_cost", self.heat_pump.operating_cost),
            ("grid.max_purchase_mw", self.grid.max_purchase_mw),
            ("grid.max_sale_mw", self.grid.max_sale_mw),
            ("grid.sale_price_ratio", self.grid.sale_price_ratio),
            ("frequency_regulation.max_capacity_mw", self.frequency_regulation.max_capacity_mw),
            ("frequency_regulation.price", self.frequency_regulation.price),
            ("spinning_reserve.max_capacity_mw", self.spinning_reserve.max_capacity_mw),
            ("spinning_reserve.price", self.spinning_reserve.price),
        ]
    }
}

fn ordered(min_name: &str, min: f64, max_name: &str, max: f64) -> Result<(), DispatchError> {
    if min > max {
        return Err(DispatchError::Validation(format!(
            "{min_name} ({min}) exceeds {max_name} ({max})"
        )));
    }
    Ok(())
}

/// PV array or wind farm. Available output is `capacity_mw` times the step's capacity factor.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RenewableUnit {
    #[validate(range(min = 0.0))]
    pub capacity_mw: f64,
    pub variable_cost: f64,
}

/// How the thermal unit's startup cost is charged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupCharging {
    /// Startup cost applies to every hour the unit is committed.
    #[default]
    PerHourOn,
    /// Startup cost applies once per off-to-on transition.
    PerStart,
}

/// Dispatchable gas turbine with unit commitment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ThermalUnit {
    #[validate(range(min = 0.0))]
    pub capacity_mw: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_output_ratio: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_output_ratio: f64,
    #[validate(range(min = 0.0))]
    pub ramp_mw_per_h: f64,
    pub variable_cost: f64,
    #[validate(range(min = 0.0))]
    pub startup_cost: f64,
    pub startup_charging: StartupCharging,
    /// Commitment state before the first step; only read for per-start charging.
    pub initially_on: bool,
}

impl Default for ThermalUnit {
    fn default() -> Self {
        Self {
            capacity_mw: 100.0,
            min_output_ratio: 0.3,
            max_output_ratio: 1.0,
            ramp_mw_per_h: 50.0,
            variable_cost: 600.0,
            startup_cost: 1000.0,
            startup_charging: StartupCharging::PerHourOn,
            initially_on: false,
        }
    }
}

impl ThermalUnit {
    pub fn min_output_mw(&self) -> f64 {
        self.capacity_mw * self.min_output_ratio
    }

    pub fn max_output_mw(&self) -> f64 {
        self.capacity_mw * self.max_output_ratio
    }
}

/// Battery energy storage. SOC values are fractions of `energy_mwh`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct StorageUnit {
    #[validate(range(min = 0.0))]
    pub power_mw: f64,
    #[validate(range(min = 0.0))]
    pub energy_mwh: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub charge_efficiency: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub discharge_efficiency: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub initial_soc: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_soc: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_soc: f64,
    pub charge_cost: f64,
    pub discharge_cost: f64,
    /// Fraction of the stored energy lost per hour.
    #[validate(range(min = 0.0, max = 1.0))]
    pub self_discharge_per_h: f64,
    /// Require the final SOC to return to the initial SOC.
    pub balanced: bool,
}

impl StorageUnit {
    /// Share of the SOC kept over a step of `dt` hours when idle.
    pub fn retention(&self, dt: f64) -> f64 {
        (1.0 - self.self_discharge_per_h).powf(dt)
    }
}

impl Default for StorageUnit {
    fn default() -> Self {
        Self {
            power_mw: 50.0,
            energy_mwh: 200.0,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
            initial_soc: 0.5,
            min_soc: 0.2,
            max_soc: 0.9,
            charge_cost: 10.0,
            discharge_cost: 15.0,
            self_discharge_per_h: 0.0,
            balanced: true,
        }
    }
}

/// Controllable load (chiller, heat pump) with an operating box of `[min_ratio, max_ratio] * rated_mw`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AdjustableLoad {
    #[validate(range(min = 0.0))]
    pub rated_mw: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_ratio: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_ratio: f64,
    pub operating_cost: f64,
}

impl AdjustableLoad {
    pub fn min_mw(&self) -> f64 {
        self.rated_mw * self.min_ratio
    }

    pub fn max_mw(&self) -> f64 {
        self.rated_mw * self.max_ratio
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct GridConnection {
    #[validate(range(min = 0.0))]
    pub max_purchase_mw: f64,
    #[validate(range(min = 0.0))]
    pub max_sale_mw: f64,
    /// Sell price as a fraction of the buy price.
    #[validate(range(min = 0.0, max = 1.0))]
    pub sale_price_ratio: f64,
}

impl Default for GridConnection {
    fn default() -> Self {
        Self {
            max_purchase_mw: 1000.0,
            max_sale_mw: 500.0,
            sale_price_ratio: 0.95,
        }
    }
}

/// Ancillary service product backed by battery headroom.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AncillaryProduct {
    #[validate(range(min = 0.0))]
    pub max_capacity_mw: f64,
    /// Revenue per MW of committed capacity per hour.
    pub price: f64,
}
