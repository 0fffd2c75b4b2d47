use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Rated battery parameters used by the dispatch model.
///
/// Charge and discharge share one power rating, as in the source data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryParams {
    /// Maximum charge/discharge power (kW)
    pub power_kw: f64,
    /// Lower state-of-charge bound (kWh)
    pub soc_min_kwh: f64,
    /// Upper state-of-charge bound (kWh)
    pub soc_max_kwh: f64,
    /// Round-trip efficiency applied on both sides of the recurrence (0 < η ≤ 1)
    pub efficiency: f64,
}

impl BatteryParams {
    /// Battery with `soc_min = 0` and `soc_max = energy_kwh`.
    pub fn new(power_kw: f64, energy_kwh: f64, efficiency: f64) -> Self {
        Self {
            power_kw,
            soc_min_kwh: 0.0,
            soc_max_kwh: energy_kwh,
            efficiency,
        }
    }

    /// A site without storage.
    pub fn none() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    pub fn with_soc_bounds(mut self, soc_min_kwh: f64, soc_max_kwh: f64) -> Self {
        self.soc_min_kwh = soc_min_kwh;
        self.soc_max_kwh = soc_max_kwh;
        self
    }

    pub fn validate(&self, entity: &str) -> Result<(), ModelError> {
        let fields = [
            ("power_kw", self.power_kw),
            ("soc_min_kwh", self.soc_min_kwh),
            ("soc_max_kwh", self.soc_max_kwh),
            ("efficiency", self.efficiency),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ModelError::inconsistent(entity, format!("battery {name} is not finite")));
            }
        }
        if self.power_kw < 0.0 {
            return Err(ModelError::inconsistent(
                entity,
                format!("battery power rating {} kW is negative", self.power_kw),
            ));
        }
        if self.soc_min_kwh > self.soc_max_kwh {
            return Err(ModelError::inconsistent(
                entity,
                format!(
                    "socMin {} kWh exceeds socMax {} kWh",
                    self.soc_min_kwh, self.soc_max_kwh
                ),
            ));
        }
        if self.efficiency <= 0.0 || self.efficiency > 1.0 {
            return Err(ModelError::inconsistent(
                entity,
                format!("efficiency {} outside (0, 1]", self.efficiency),
            ));
        }
        Ok(())
    }
}

/// Battery parameters for a whole portfolio.
///
/// Aggregator data describes one device type installed at every site;
/// retail data sizes a battery per client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "batteries", rename_all = "snake_case")]
pub enum DeviceFleet {
    Shared(BatteryParams),
    PerEntity(Vec<BatteryParams>),
}

impl DeviceFleet {
    /// Device parameters that apply to the entity at `index`.
    pub fn params_for(&self, index: usize) -> Option<BatteryParams> {
        match self {
            DeviceFleet::Shared(params) => Some(*params),
            DeviceFleet::PerEntity(all) => all.get(index).copied(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, DeviceFleet::Shared(_))
    }
}
