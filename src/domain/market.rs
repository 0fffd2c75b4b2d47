use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

/// Number of FCAS products per direction.
pub const FCAS_MARKET_COUNT: usize = 3;

/// Number of tariffs in the retail tariff tables.
pub const TARIFF_COUNT: usize = 4;

/// Contingency FCAS products, by response speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FcasMarket {
    /// 6-second response
    Fast,
    /// 60-second response
    Slow,
    /// 5-minute response
    Delayed,
}

impl FcasMarket {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn all() -> impl Iterator<Item = FcasMarket> {
        FcasMarket::iter()
    }

    /// Column name of the raise price for this product in the wholesale price file.
    pub fn raise_column(self) -> &'static str {
        match self {
            FcasMarket::Fast => "RAISE6S",
            FcasMarket::Slow => "RAISE60S",
            FcasMarket::Delayed => "RAISE5MIN",
        }
    }

    /// Column name of the lower price for this product in the wholesale price file.
    pub fn lower_column(self) -> &'static str {
        match self {
            FcasMarket::Fast => "LOWER6S",
            FcasMarket::Slow => "LOWER60S",
            FcasMarket::Delayed => "LOWER5MIN",
        }
    }
}

/// Raise and lower FCAS prices ($/kW per hour of enablement), one row per interval.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FcasPrices {
    pub raise: Vec<[f64; FCAS_MARKET_COUNT]>,
    pub lower: Vec<[f64; FCAS_MARKET_COUNT]>,
}

impl FcasPrices {
    pub fn new(raise: Vec<[f64; FCAS_MARKET_COUNT]>, lower: Vec<[f64; FCAS_MARKET_COUNT]>) -> Self {
        Self { raise, lower }
    }

    /// Same price in every product and interval.
    pub fn flat(interval_count: usize, raise: f64, lower: f64) -> Self {
        Self {
            raise: vec![[raise; FCAS_MARKET_COUNT]; interval_count],
            lower: vec![[lower; FCAS_MARKET_COUNT]; interval_count],
        }
    }

    pub fn raise_at(&self, t: usize, market: FcasMarket) -> f64 {
        self.raise[t][market.index()]
    }

    pub fn lower_at(&self, t: usize, market: FcasMarket) -> f64 {
        self.lower[t][market.index()]
    }

    pub fn is_finite(&self) -> bool {
        self.raise
            .iter()
            .chain(self.lower.iter())
            .all(|row| row.iter().all(|p| p.is_finite()))
    }
}

/// Retail tariffs: a buy price series and a flat sell price per tariff.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TariffTable {
    /// `buy[k][t]` in $/kWh
    pub buy: Vec<Vec<f64>>,
    /// `sell[k]` in $/kWh
    pub sell: Vec<f64>,
}

impl TariffTable {
    pub fn new(buy: Vec<Vec<f64>>, sell: Vec<f64>) -> Self {
        Self { buy, sell }
    }

    pub fn tariff_count(&self) -> usize {
        self.buy.len().min(self.sell.len())
    }

    pub fn buy_series(&self, tariff: usize) -> Option<&[f64]> {
        self.buy.get(tariff).map(Vec::as_slice)
    }

    pub fn sell_price(&self, tariff: usize) -> Option<f64> {
        self.sell.get(tariff).copied()
    }
}
