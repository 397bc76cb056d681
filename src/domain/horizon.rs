use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

pub const DEFAULT_HORIZON_STEPS: usize = 24;

/// Length of one dispatch step in hours.
pub const STEP_HOURS: f64 = 1.0;

/// Ordered sequence of hourly dispatch steps, labelled from `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeHorizon {
    pub start: NaiveDateTime,
    pub steps: usize,
}

impl Default for TimeHorizon {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self::hourly(start, DEFAULT_HORIZON_STEPS)
    }
}

impl TimeHorizon {
    pub fn hourly(start: NaiveDateTime, steps: usize) -> Self {
        Self { start, steps }
    }

    /// Default start date with a custom number of steps.
    pub fn with_steps(steps: usize) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn step_hours(&self) -> f64 {
        STEP_HOURS
    }

    /// Timestamp labelling the step with zero-based index `index`.
    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        self.start + Duration::hours(index as i64)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        (0..self.steps).map(|index| self.timestamp(index))
    }

    pub fn ensure_valid(&self) -> Result<(), DispatchError> {
        if self.steps == 0 {
            return Err(DispatchError::Validation(
                "horizon must contain at least one step".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exogenous per-step inputs: base load, renewable capacity factors and grid buy price.
///
/// The sell price is derived from the buy price with the grid's sale ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSeries {
    pub load_mw: Vec<f64>,
    pub pv_capacity_factor: Vec<f64>,
    pub wind_capacity_factor: Vec<f64>,
    pub buy_price: Vec<f64>,
}

impl InputSeries {
    /// Constant load and price, no renewable resource.
    pub fn flat(steps: usize, load_mw: f64, buy_price: f64) -> Self {
        Self {
            load_mw: vec![load_mw; steps],
            pv_capacity_factor: vec![0.0; steps],
            wind_capacity_factor: vec![0.0; steps],
            buy_price: vec![buy_price; steps],
        }
    }

    pub fn len(&self) -> usize {
        self.load_mw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.load_mw.is_empty()
    }

    pub fn sell_price(&self, index: usize, sale_price_ratio: f64) -> f64 {
        self.buy_price[index] * sale_price_ratio
    }

    /// Rejects series whose length differs from the horizon or whose values
    /// cannot describe a physical system.
    pub fn ensure_matches(&self, horizon: &TimeHorizon) -> Result<(), DispatchError> {
        horizon.ensure_valid()?;

        let series = [
            ("load_mw", &self.load_mw),
            ("pv_capacity_factor", &self.pv_capacity_factor),
            ("wind_capacity_factor", &self.wind_capacity_factor),
            ("buy_price", &self.buy_price),
        ];

        for (name, values) in series {
            if values.len() != horizon.steps {
                return Err(DispatchError::Validation(format!(
                    "{name} has {} values, horizon has {} steps",
                    values.len(),
                    horizon.steps
                )));
            }
            if let Some(index) = values.iter().position(|v| !v.is_finite()) {
                return Err(DispatchError::Validation(format!(
                    "{name}[{index}] is not finite"
                )));
            }
        }

        if let Some(index) = self.load_mw.iter().position(|&v| v < 0.0) {
            return Err(DispatchError::Validation(format!(
                "load_mw[{index}] is negative"
            )));
        }

        for (name, factors) in [
            ("pv_capacity_factor", &self.pv_capacity_factor),
            ("wind_capacity_factor", &self.wind_capacity_factor),
        ] {
            if let Some(index) = factors.iter().position(|&v| !(0.0..=1.0).contains(&v)) {
                return Err(DispatchError::Validation(format!(
                    "{name}[{index}] = {} outside [0, 1]",
                    factors[index]
                )));
            }
        }

        Ok(())
    }
}
