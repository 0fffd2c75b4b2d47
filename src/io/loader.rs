//! CSV data loader.
//!
//! A data directory holds one file per table (see [`DataFiles`]). Every
//! time series is read in full; a file whose row count disagrees with the
//! load table is an error, never truncated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{
    BatteryParams, Configuration, DeviceFleet, FcasMarket, FcasPrices, Portfolio, TariffTable, TimeGrid,
    FCAS_MARKET_COUNT,
};
use crate::error::LoadError;

const TIME_COLUMN: &str = "Time";
const ENERGY_COLUMN: &str = "ENERGY";

/// File names inside the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFiles {
    pub load: String,
    pub pv: String,
    pub prices: String,
    pub battery: String,
    pub tariff_buy: String,
    pub tariff_sell: String,
}

impl Default for DataFiles {
    fn default() -> Self {
        Self {
            load: "load.csv".into(),
            pv: "pv.csv".into(),
            prices: "prices.csv".into(),
            battery: "battery.csv".into(),
            tariff_buy: "tariff_buy.csv".into(),
            tariff_sell: "tariff_sell.csv".into(),
        }
    }
}

/// Where and how to read a portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub dir: PathBuf,
    pub files: DataFiles,
    /// Total horizon covered by the series; Δt = horizon / rows
    pub horizon_hours: f64,
    /// Multiplier applied to every column of the wholesale price file
    pub price_scale: f64,
}

impl DataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: DataFiles::default(),
            horizon_hours: 8760.0,
            price_scale: 1.0,
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

/// Which optional tables the configurations to be run depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataNeeds {
    pub fcas: bool,
    pub tariffs: bool,
    /// One battery for every entity (aggregator data)
    pub shared_battery: bool,
}

impl DataNeeds {
    pub fn for_configs(configs: &[Configuration]) -> Self {
        let retail = configs.iter().any(Configuration::is_retail);
        Self {
            fcas: configs.iter().any(Configuration::fcas_enabled),
            tariffs: retail,
            shared_battery: !retail,
        }
    }
}

/// A parsed CSV file: header names plus raw rows.
struct Table {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl Table {
    fn read(path: &Path) -> Result<Self, LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| csv_error(path, source))?;
        let headers = reader
            .headers()
            .map_err(|source| csv_error(path, source))?
            .iter()
            .map(str::to_string)
            .collect();
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| csv_error(path, source))?;
        if rows.is_empty() {
            return Err(LoadError::Empty {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), rows = rows.len(), "table read");
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    fn require(&self, column: &str) -> Result<usize, LoadError> {
        self.index_of(column).ok_or_else(|| LoadError::MissingColumn {
            path: self.path.clone(),
            column: column.to_string(),
        })
    }

    fn text_column(&self, index: usize) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.get(index).unwrap_or_default().to_string())
            .collect()
    }

    fn numeric_column(&self, index: usize) -> Result<Vec<f64>, LoadError> {
        let name = self.headers.get(index).cloned().unwrap_or_default();
        self.rows
            .iter()
            .enumerate()
            .map(|(row, record)| {
                let cell = record.get(index).unwrap_or_default();
                cell.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| LoadError::InvalidCell {
                        path: self.path.clone(),
                        row: row + 1,
                        column: name.clone(),
                        value: cell.to_string(),
                    })
            })
            .collect()
    }

    fn named_column(&self, column: &str) -> Result<Vec<f64>, LoadError> {
        self.numeric_column(self.require(column)?)
    }

    /// Every column except `Time`, in file order.
    fn data_columns(&self) -> Vec<(usize, &str)> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.as_str() != TIME_COLUMN)
            .map(|(i, h)| (i, h.as_str()))
            .collect()
    }

    fn expect_rows(&self, expected: usize) -> Result<(), LoadError> {
        if self.len() != expected {
            return Err(LoadError::LengthMismatch {
                what: format!("rows of '{}'", self.path.display()),
                expected,
                found: self.len(),
            });
        }
        Ok(())
    }
}

fn csv_error(path: &Path, source: csv::Error) -> LoadError {
    match source.kind() {
        csv::ErrorKind::Io(_) => match source.into_kind() {
            csv::ErrorKind::Io(io) => LoadError::Io {
                path: path.to_path_buf(),
                source: io,
            },
            _ => LoadError::Invalid(format!("unreadable '{}'", path.display())),
        },
        _ => LoadError::Csv {
            path: path.to_path_buf(),
            source,
        },
    }
}

#[derive(Debug, Deserialize)]
struct BatteryRow {
    #[serde(default)]
    entity_id: Option<String>,
    power_kw: f64,
    energy_kwh: f64,
    efficiency: f64,
    #[serde(default)]
    soc_min_kwh: Option<f64>,
}

impl BatteryRow {
    fn params(&self) -> BatteryParams {
        let battery = BatteryParams::new(self.power_kw, self.energy_kwh, self.efficiency);
        match self.soc_min_kwh {
            Some(min) => battery.with_soc_bounds(min, self.energy_kwh),
            None => battery,
        }
    }
}

fn read_fleet(path: &Path, entity_ids: &[String], shared: bool) -> Result<DeviceFleet, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| csv_error(path, source))?;
    let rows = reader
        .deserialize::<BatteryRow>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| csv_error(path, source))?;

    if shared {
        return match rows.as_slice() {
            [row] => Ok(DeviceFleet::Shared(row.params())),
            [] => Err(LoadError::Empty {
                path: path.to_path_buf(),
            }),
            _ => Err(LoadError::LengthMismatch {
                what: format!("shared battery rows in '{}'", path.display()),
                expected: 1,
                found: rows.len(),
            }),
        };
    }

    if rows.iter().all(|r| r.entity_id.is_some()) && !rows.is_empty() {
        let by_id: HashMap<&str, &BatteryRow> = rows
            .iter()
            .filter_map(|r| r.entity_id.as_deref().map(|id| (id, r)))
            .collect();
        let batteries = entity_ids
            .iter()
            .map(|id| {
                by_id
                    .get(id.as_str())
                    .map(|r| r.params())
                    .ok_or_else(|| LoadError::Invalid(format!("no battery row for entity '{id}' in '{}'", path.display())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(DeviceFleet::PerEntity(batteries));
    }

    if rows.len() != entity_ids.len() {
        return Err(LoadError::LengthMismatch {
            what: format!("battery rows in '{}'", path.display()),
            expected: entity_ids.len(),
            found: rows.len(),
        });
    }
    Ok(DeviceFleet::PerEntity(rows.iter().map(BatteryRow::params).collect()))
}

fn read_fcas(prices: &Table, scale: f64) -> Result<FcasPrices, LoadError> {
    let mut raise = vec![[0.0; FCAS_MARKET_COUNT]; prices.len()];
    let mut lower = vec![[0.0; FCAS_MARKET_COUNT]; prices.len()];
    for market in FcasMarket::all() {
        let w = market.index();
        for (t, v) in prices.named_column(market.raise_column())?.into_iter().enumerate() {
            raise[t][w] = v * scale;
        }
        for (t, v) in prices.named_column(market.lower_column())?.into_iter().enumerate() {
            lower[t][w] = v * scale;
        }
    }
    Ok(FcasPrices::new(raise, lower))
}

fn read_tariffs(buy: &Table, sell: &Table) -> Result<TariffTable, LoadError> {
    let buy_series = buy
        .data_columns()
        .into_iter()
        .map(|(i, _)| buy.numeric_column(i))
        .collect::<Result<Vec<_>, _>>()?;

    let sell_prices = (0..sell.headers.len())
        .map(|i| sell.numeric_column(i).map(|col| col[0]))
        .collect::<Result<Vec<_>, _>>()?;

    if sell_prices.len() != buy_series.len() {
        return Err(LoadError::LengthMismatch {
            what: format!("tariffs in '{}'", sell.path.display()),
            expected: buy_series.len(),
            found: sell_prices.len(),
        });
    }
    Ok(TariffTable::new(buy_series, sell_prices))
}

/// Reads the portfolio under `source`, loading only the optional tables `needs` asks for.
pub fn load_portfolio(source: &DataSource, needs: DataNeeds) -> Result<Portfolio, LoadError> {
    let load = Table::read(&source.path(&source.files.load))?;
    let n = load.len();

    let entity_ids: Vec<String> = load.data_columns().iter().map(|(_, h)| h.to_string()).collect();
    if entity_ids.is_empty() {
        return Err(LoadError::Invalid(format!(
            "'{}' has no entity columns",
            load.path.display()
        )));
    }
    let load_kw = load
        .data_columns()
        .into_iter()
        .map(|(i, _)| load.numeric_column(i))
        .collect::<Result<Vec<_>, _>>()?;

    let pv = Table::read(&source.path(&source.files.pv))?;
    pv.expect_rows(n)?;
    let pv_kw = entity_ids
        .iter()
        .map(|id| pv.named_column(id))
        .collect::<Result<Vec<_>, _>>()?;

    let prices = Table::read(&source.path(&source.files.prices))?;
    prices.expect_rows(n)?;
    let energy_price: Arc<[f64]> = prices
        .named_column(ENERGY_COLUMN)?
        .into_iter()
        .map(|p| p * source.price_scale)
        .collect();
    let fcas_prices = if needs.fcas {
        Some(Arc::new(read_fcas(&prices, source.price_scale)?))
    } else {
        None
    };

    let (tariffs, time_labels) = if needs.tariffs {
        let buy = Table::read(&source.path(&source.files.tariff_buy))?;
        buy.expect_rows(n)?;
        let sell = Table::read(&source.path(&source.files.tariff_sell))?;
        let labels = buy.index_of(TIME_COLUMN).map(|i| buy.text_column(i));
        (Some(Arc::new(read_tariffs(&buy, &sell)?)), labels)
    } else {
        (None, None)
    };
    let time_labels = time_labels
        .or_else(|| prices.index_of(TIME_COLUMN).map(|i| prices.text_column(i)))
        .or_else(|| load.index_of(TIME_COLUMN).map(|i| load.text_column(i)))
        .unwrap_or_else(|| (0..n).map(|t| t.to_string()).collect());

    let fleet = read_fleet(&source.path(&source.files.battery), &entity_ids, needs.shared_battery)?;

    let grid = TimeGrid::from_horizon(source.horizon_hours, n).map_err(|e| LoadError::Invalid(e.to_string()))?;

    info!(
        dir = %source.dir.display(),
        entities = entity_ids.len(),
        intervals = n,
        interval_hours = grid.interval_hours(),
        shared_battery = fleet.is_shared(),
        "portfolio loaded"
    );

    Ok(Portfolio {
        grid,
        time_labels,
        entity_ids,
        load_kw,
        pv_kw,
        energy_price,
        fcas_prices,
        tariffs,
        fleet,
    })
}
