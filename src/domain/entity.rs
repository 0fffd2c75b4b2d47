use std::sync::Arc;

use super::{BatteryParams, FcasPrices, TariffTable, TimeGrid};
use crate::error::ModelError;

/// Static device data and time series for one client or portfolio.
///
/// Price data is shared between entities of the same portfolio, hence the
/// `Arc`s; the builder only ever reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityParameters {
    pub id: String,
    /// Inflexible load forecast (kW)
    pub load_kw: Vec<f64>,
    /// PV generation forecast (kW); dispatched PV never exceeds it
    pub pv_kw: Vec<f64>,
    pub battery: BatteryParams,
    /// Wholesale energy price ($/kWh)
    pub energy_price: Arc<[f64]>,
    pub fcas_prices: Option<Arc<FcasPrices>>,
    pub tariffs: Option<Arc<TariffTable>>,
}

impl EntityParameters {
    pub fn new(
        id: impl Into<String>,
        load_kw: Vec<f64>,
        pv_kw: Vec<f64>,
        battery: BatteryParams,
        energy_price: impl Into<Arc<[f64]>>,
    ) -> Self {
        Self {
            id: id.into(),
            load_kw,
            pv_kw,
            battery,
            energy_price: energy_price.into(),
            fcas_prices: None,
            tariffs: None,
        }
    }

    pub fn with_fcas_prices(mut self, prices: impl Into<Arc<FcasPrices>>) -> Self {
        self.fcas_prices = Some(prices.into());
        self
    }

    pub fn with_tariffs(mut self, tariffs: impl Into<Arc<TariffTable>>) -> Self {
        self.tariffs = Some(tariffs.into());
        self
    }

    /// Checks the invariants every formulation relies on: series lengths
    /// match the grid, values are finite, PV forecast is non-negative and the
    /// battery bounds are ordered.
    pub fn validate(&self, grid: &TimeGrid) -> Result<(), ModelError> {
        let n = grid.interval_count();
        self.check_series("load forecast", &self.load_kw, n)?;
        self.check_series("PV forecast", &self.pv_kw, n)?;
        self.check_series("energy price", &self.energy_price, n)?;
        if let Some(t) = self.pv_kw.iter().position(|p| *p < 0.0) {
            return Err(ModelError::inconsistent(
                &self.id,
                format!("PV forecast is negative at interval {t}"),
            ));
        }
        self.battery.validate(&self.id)
    }

    /// Checks that FCAS prices exist and cover the grid.
    pub fn validate_fcas(&self, grid: &TimeGrid) -> Result<&FcasPrices, ModelError> {
        let prices = self
            .fcas_prices
            .as_deref()
            .ok_or_else(|| ModelError::inconsistent(&self.id, "FCAS enabled but no FCAS prices given"))?;
        let n = grid.interval_count();
        if prices.raise.len() != n || prices.lower.len() != n {
            return Err(ModelError::inconsistent(
                &self.id,
                format!(
                    "FCAS prices cover {}/{} intervals (raise/lower), grid has {n}",
                    prices.raise.len(),
                    prices.lower.len()
                ),
            ));
        }
        if !prices.is_finite() {
            return Err(ModelError::inconsistent(&self.id, "FCAS prices contain non-finite values"));
        }
        Ok(prices)
    }

    /// Checks that tariff `index` exists and covers the grid; returns its buy series and sell price.
    pub fn validate_tariff(&self, grid: &TimeGrid, index: usize) -> Result<(&[f64], f64), ModelError> {
        let table = self
            .tariffs
            .as_deref()
            .ok_or_else(|| ModelError::inconsistent(&self.id, "retail variant requires tariff tables"))?;
        let buy = table.buy_series(index);
        let sell = table.sell_price(index);
        let (Some(buy), Some(sell)) = (buy, sell) else {
            return Err(ModelError::inconsistent(
                &self.id,
                format!("tariff {index} not present ({} tariffs loaded)", table.tariff_count()),
            ));
        };
        self.check_series(&format!("tariff {index} buy price"), buy, grid.interval_count())?;
        if !sell.is_finite() {
            return Err(ModelError::inconsistent(&self.id, format!("tariff {index} sell price is not finite")));
        }
        Ok((buy, sell))
    }

    fn check_series(&self, what: &str, series: &[f64], expected: usize) -> Result<(), ModelError> {
        if series.len() != expected {
            return Err(ModelError::inconsistent(
                &self.id,
                format!("{what} has {} intervals, grid has {expected}", series.len()),
            ));
        }
        if let Some(t) = series.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::inconsistent(
                &self.id,
                format!("{what} is not finite at interval {t}"),
            ));
        }
        Ok(())
    }
}
