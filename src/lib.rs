//! Least-cost hourly dispatch of a virtual power plant.
//!
//! A run selects a [`domain::SchedulingMode`] (which resources exist) and an
//! [`domain::OptimizationObjective`] (how their costs and revenues are weighted),
//! builds a mixed-integer model over the horizon, solves it and returns a
//! per-step schedule with a cost breakdown recomputed from that schedule.

pub mod config;
pub mod domain;
pub mod error;
pub mod optimizer;
pub mod telemetry;

pub use error::DispatchError;
