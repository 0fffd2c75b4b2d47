use std::sync::Arc;

use super::{DeviceFleet, EntityParameters, FcasPrices, TariffTable, TimeGrid};
use crate::error::LoadError;

/// Everything loaded once for a run: entity ids, time axis, series and devices.
#[derive(Debug, Clone)]
pub struct Portfolio {
    pub grid: TimeGrid,
    pub time_labels: Vec<String>,
    pub entity_ids: Vec<String>,
    /// `load_kw[e][t]`
    pub load_kw: Vec<Vec<f64>>,
    /// `pv_kw[e][t]`
    pub pv_kw: Vec<Vec<f64>>,
    pub energy_price: Arc<[f64]>,
    pub fcas_prices: Option<Arc<FcasPrices>>,
    pub tariffs: Option<Arc<TariffTable>>,
    pub fleet: DeviceFleet,
}

impl Portfolio {
    pub fn entity_count(&self) -> usize {
        self.entity_ids.len()
    }

    /// Parameters of entity `index`, with device data resolved through the fleet.
    pub fn entity_parameters(&self, index: usize) -> Option<EntityParameters> {
        let id = self.entity_ids.get(index)?;
        let battery = self.fleet.params_for(index)?;
        let mut params = EntityParameters::new(
            id.clone(),
            self.load_kw.get(index)?.clone(),
            self.pv_kw.get(index)?.clone(),
            battery,
            Arc::clone(&self.energy_price),
        );
        params.fcas_prices = self.fcas_prices.clone();
        params.tariffs = self.tariffs.clone();
        Some(params)
    }

    /// Parameters for the inclusive index range `start..=end`.
    pub fn entity_range(&self, start: usize, end: usize) -> Result<Vec<EntityParameters>, LoadError> {
        if start > end || end >= self.entity_count() {
            return Err(LoadError::Invalid(format!(
                "entity range {start}..={end} outside the {} loaded entities",
                self.entity_count()
            )));
        }
        (start..=end)
            .map(|i| {
                self.entity_parameters(i).ok_or_else(|| {
                    LoadError::Invalid(format!("no device parameters for entity index {i}"))
                })
            })
            .collect()
    }
}
