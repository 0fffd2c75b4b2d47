use serde::{Deserialize, Serialize};

/// Business model the MILP is formulated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum MarketVariant {
    /// Wholesale energy bids, optionally with FCAS capacity bids.
    AggregatorBid { fcas_enabled: bool },
    /// Energy bought and sold through retail tariff `tariff_index`.
    RetailBid { tariff_index: usize },
}

/// One formulation choice for a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    pub variant: MarketVariant,
    pub save_trajectories: bool,
}

impl Configuration {
    pub fn aggregator(fcas_enabled: bool) -> Self {
        Self {
            variant: MarketVariant::AggregatorBid { fcas_enabled },
            save_trajectories: false,
        }
    }

    pub fn retail(tariff_index: usize) -> Self {
        Self {
            variant: MarketVariant::RetailBid { tariff_index },
            save_trajectories: false,
        }
    }

    pub fn with_trajectories(mut self, save: bool) -> Self {
        self.save_trajectories = save;
        self
    }

    pub fn fcas_enabled(&self) -> bool {
        matches!(self.variant, MarketVariant::AggregatorBid { fcas_enabled: true })
    }

    pub fn tariff_index(&self) -> Option<usize> {
        match self.variant {
            MarketVariant::RetailBid { tariff_index } => Some(tariff_index),
            MarketVariant::AggregatorBid { .. } => None,
        }
    }

    pub fn is_retail(&self) -> bool {
        matches!(self.variant, MarketVariant::RetailBid { .. })
    }

    /// Relative output location, e.g. `aggregator/with_fcas` or `retail/tariff_2`.
    pub fn label(&self) -> String {
        match self.variant {
            MarketVariant::AggregatorBid { fcas_enabled: true } => "aggregator/with_fcas".to_string(),
            MarketVariant::AggregatorBid { fcas_enabled: false } => "aggregator/without_fcas".to_string(),
            MarketVariant::RetailBid { tariff_index } => format!("retail/tariff_{tariff_index}"),
        }
    }
}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Configuration::aggregator(true).label(), "aggregator/with_fcas");
        assert_eq!(Configuration::aggregator(false).to_string(), "aggregator/without_fcas");
        assert_eq!(Configuration::retail(3).label(), "retail/tariff_3");
    }

    #[test]
    fn test_flags_only_meaningful_for_their_variant() {
        let retail = Configuration::retail(1).with_trajectories(true);
        assert!(!retail.fcas_enabled());
        assert_eq!(retail.tariff_index(), Some(1));
        assert!(retail.save_trajectories);
        assert_eq!(Configuration::aggregator(true).tariff_index(), None);
    }
}
