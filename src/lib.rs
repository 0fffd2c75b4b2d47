//! MILP bidding optimisation for energy aggregators and retail tariffs.
//!
//! Per entity (a client site or an aggregated portfolio), a mixed-integer
//! program schedules battery charge/discharge, PV self-consumption and
//! optional FCAS capacity offers to minimise net electricity cost.
//!
//! `domain` holds the inputs, `optimizer` builds and solves the MILP,
//! `batch` runs it over a population of entities and `io` reads data
//! directories and writes result tables.

pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod optimizer;
pub mod telemetry;
