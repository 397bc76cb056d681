use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::DispatchError;

/// Closed catalogue of optimization objectives.
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
pub enum OptimizationObjective {
    CostMinimization,
    RevenueMaximization,
    ProfitMaximization,
    AncillaryRevenueMax,
    GridSupportOptimized,
}

impl OptimizationObjective {
    pub fn description(self) -> &'static str {
        match self {
            OptimizationObjective::CostMinimization => "Minimize total operating cost net of revenue",
            OptimizationObjective::RevenueMaximization => {
                "Maximize market revenue, treating variable generation cost as sunk"
            }
            OptimizationObjective::ProfitMaximization => "Maximize revenue minus operating cost",
            OptimizationObjective::AncillaryRevenueMax => {
                "Prioritize ancillary service revenue over energy cost"
            }
            OptimizationObjective::GridSupportOptimized => {
                "Discount operating cost to favour flexibility offered to the grid"
            }
        }
    }

    pub fn id(self) -> &'static str {
        self.into()
    }

    /// Parses an objective identifier such as `cost_minimization`.
    pub fn from_id(id: &str) -> Result<Self, DispatchError> {
        OptimizationObjective::from_str(id.trim()).map_err(|_| {
            DispatchError::Configuration(format!("unknown optimization objective '{id}'"))
        })
    }
}
