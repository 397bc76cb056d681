use std::str::FromStr;

use enumset::{enum_set, EnumSet};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::DispatchError;

/// Resource category a scheduling mode can switch on.
#[derive(Debug, Display, enumset::EnumSetType)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// PV and wind generation.
    Renewable,

    /// Gas turbine with unit commitment.
    Thermal,

    /// Battery charge, discharge and state of charge.
    Storage,

    /// Chiller and heat pump.
    AdjustableLoad,

    /// Grid purchase and sale. Present in every mode.
    Grid,

    /// Frequency regulation and spinning reserve capacity.
    Ancillary,
}

pub type CapabilitySet = EnumSet<Capability>;

/// Closed catalogue of scheduling modes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SchedulingMode {
    RenewableStorage,
    AdjustableStorage,
    Traditional,
    NoRenewable,
    StorageOnly,
    FullSystem,
}

impl SchedulingMode {
    /// Resource categories instantiated by this mode. Grid exchange is always on.
    pub fn capabilities(self) -> CapabilitySet {
        use Capability::*;

        let set: CapabilitySet = match self {
            SchedulingMode::RenewableStorage => enum_set!(Renewable | Storage),
            SchedulingMode::AdjustableStorage => enum_set!(Storage | AdjustableLoad),
            SchedulingMode::Traditional => enum_set!(Renewable | Thermal | Storage | AdjustableLoad),
            SchedulingMode::NoRenewable => enum_set!(Thermal | Storage | AdjustableLoad),
            SchedulingMode::StorageOnly => enum_set!(Storage),
            SchedulingMode::FullSystem => EnumSet::all(),
        };
        set | Grid
    }

    pub fn description(self) -> &'static str {
        match self {
            SchedulingMode::RenewableStorage => "PV and wind with battery storage, no controllable loads",
            SchedulingMode::AdjustableStorage => "Battery storage with chiller and heat pump load shifting",
            SchedulingMode::Traditional => "All physical resources, no ancillary services",
            SchedulingMode::NoRenewable => "Gas turbine, battery and controllable loads without renewables",
            SchedulingMode::StorageOnly => "Battery arbitrage against the grid",
            SchedulingMode::FullSystem => "Every resource including ancillary service provision",
        }
    }

    pub fn id(self) -> &'static str {
        self.into()
    }

    /// Parses a mode identifier such as `storage_only`.
    pub fn from_id(id: &str) -> Result<Self, DispatchError> {
        SchedulingMode::from_str(id.trim()).map_err(|_| {
            DispatchError::Configuration(format!("unknown scheduling mode '{id}'"))
        })
    }
}

/// Maps mode identifiers to the resource categories they activate.
pub struct ModeSelector;

impl ModeSelector {
    pub fn select(id: &str) -> Result<(SchedulingMode, CapabilitySet), DispatchError> {
        let mode = SchedulingMode::from_id(id)?;
        Ok((mode, mode.capabilities()))
    }
}
