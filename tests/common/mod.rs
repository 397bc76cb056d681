//! Shared fixtures for the dispatch integration tests.

#![allow(dead_code)]

use figment::providers::{Format, Toml};
use figment::Figment;

use vpp_dispatch::config::Config;
use vpp_dispatch::domain::{InputSeries, TimeHorizon};
use vpp_dispatch::optimizer::{DispatchStep, SolverConfig};

/// The day shipped in `config/default.toml`.
pub fn default_config() -> Config {
    let figment = Figment::new().merge(Toml::file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml")));
    Config::from_figment(figment).expect("default config parses")
}

/// First `steps` hours of the default day.
pub fn default_day(steps: usize) -> (TimeHorizon, InputSeries) {
    let config = default_config();
    let take = |values: &[f64]| values[..steps].to_vec();
    let series = InputSeries {
        load_mw: take(&config.series.load_mw),
        pv_capacity_factor: take(&config.series.pv_capacity_factor),
        wind_capacity_factor: take(&config.series.wind_capacity_factor),
        buy_price: take(&config.series.buy_price),
    };
    (TimeHorizon::hourly(config.horizon.start, steps), series)
}

pub fn solver(threads: usize) -> SolverConfig {
    SolverConfig {
        threads,
        time_limit_secs: 60.0,
        ..SolverConfig::default()
    }
}

pub fn assert_balanced(step: &DispatchStep) {
    let tolerance = 1e-6 * (1.0 + step.demand_mw.abs());
    assert!(
        step.imbalance_mw().abs() <= tolerance,
        "step {} is off balance by {} MW",
        step.step,
        step.imbalance_mw()
    );
}

pub fn assert_close(left: f64, right: f64, tolerance: f64) {
    assert!((left - right).abs() <= tolerance, "{left} != {right} (tolerance {tolerance})");
}
