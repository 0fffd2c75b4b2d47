use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Planning horizon shared by every series of a data source.
///
/// `interval_hours` is the Δt used by the storage recurrence and by every
/// price term of the objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeGrid {
    interval_count: usize,
    interval_hours: f64,
}

impl TimeGrid {
    pub fn new(interval_count: usize, interval_hours: f64) -> Result<Self, ModelError> {
        if interval_count == 0 {
            return Err(ModelError::inconsistent("<grid>", "interval count must be positive"));
        }
        if !interval_hours.is_finite() || interval_hours <= 0.0 {
            return Err(ModelError::inconsistent(
                "<grid>",
                format!("interval duration must be a positive number of hours, got {interval_hours}"),
            ));
        }
        Ok(Self {
            interval_count,
            interval_hours,
        })
    }

    /// Splits `total_hours` evenly into `interval_count` intervals.
    pub fn from_horizon(total_hours: f64, interval_count: usize) -> Result<Self, ModelError> {
        if interval_count == 0 {
            return Err(ModelError::inconsistent("<grid>", "interval count must be positive"));
        }
        Self::new(interval_count, total_hours / interval_count as f64)
    }

    pub fn interval_count(&self) -> usize {
        self.interval_count
    }

    pub fn interval_hours(&self) -> f64 {
        self.interval_hours
    }

    /// Number of state-of-charge points (interval boundaries).
    pub fn soc_points(&self) -> usize {
        self.interval_count + 1
    }

    pub fn horizon_hours(&self) -> f64 {
        self.interval_hours * self.interval_count as f64
    }
}
