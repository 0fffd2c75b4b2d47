use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Configuration, FcasMarket, TimeGrid};
use crate::error::FailureKind;
use crate::optimizer::{CostBreakdown, EntityResult, Family, SolverStats};

/// One output series: a variable family, split by FCAS product where it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub family: Family,
    pub market: Option<FcasMarket>,
}

impl SeriesKey {
    pub fn keys_for(family: Family) -> Vec<SeriesKey> {
        if family.is_per_market() {
            FcasMarket::all()
                .map(|m| SeriesKey {
                    family,
                    market: Some(m),
                })
                .collect()
        } else {
            vec![SeriesKey {
                family,
                market: None,
            }]
        }
    }

    /// File stem, e.g. `charging_BESS` or `Raise_FCAS_bids_fast`.
    pub fn file_stem(&self) -> String {
        match self.market {
            Some(m) => format!("{}_{}", self.family.output_name(), m),
            None => self.family.output_name().to_string(),
        }
    }
}

/// Column-per-entity matrix; unsolved entities keep NaN columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryMatrix {
    pub rows: usize,
    pub columns: Vec<Vec<f64>>,
}

impl TrajectoryMatrix {
    pub fn new(rows: usize, entity_count: usize) -> Self {
        Self {
            rows,
            columns: vec![vec![f64::NAN; rows]; entity_count],
        }
    }

    pub fn column(&self, entity: usize) -> Option<&[f64]> {
        self.columns.get(entity).map(Vec::as_slice)
    }

    fn fill(&mut self, entity: usize, values: impl Iterator<Item = f64>) {
        if let Some(col) = self.columns.get_mut(entity) {
            for (slot, v) in col.iter_mut().zip(values) {
                *slot = v;
            }
        }
    }
}

/// Scalar outcome of one entity in one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub status: String,
    pub failure: Option<FailureKind>,
    pub proven_optimal: bool,
    pub costs: CostBreakdown,
    pub stats: SolverStats,
    pub message: Option<String>,
}

impl EntityRecord {
    pub fn from_result(entity_id: &str, result: &EntityResult) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            status: result.status_label(),
            failure: result.failure,
            proven_optimal: result.proven_optimal,
            costs: result.costs,
            stats: result.stats,
            message: result.message.clone(),
        }
    }
}

/// Everything collected for one configuration.
#[derive(Debug, Clone)]
pub struct ScenarioAggregate {
    pub configuration: Configuration,
    pub entity_ids: Vec<String>,
    /// One slot per entity, in input order
    pub records: Vec<Option<EntityRecord>>,
    pub trajectories: BTreeMap<SeriesKey, TrajectoryMatrix>,
}

impl ScenarioAggregate {
    /// Empty aggregate with every slot and matrix pre-sized.
    pub fn new(configuration: Configuration, entity_ids: Vec<String>, grid: &TimeGrid) -> Self {
        let count = entity_ids.len();
        let trajectories = if configuration.save_trajectories {
            Family::present_in(&configuration)
                .into_iter()
                .flat_map(SeriesKey::keys_for)
                .map(|key| {
                    let rows = if key.family == Family::StateOfCharge {
                        grid.soc_points()
                    } else {
                        grid.interval_count()
                    };
                    (key, TrajectoryMatrix::new(rows, count))
                })
                .collect()
        } else {
            BTreeMap::new()
        };
        Self {
            configuration,
            records: vec![None; count],
            entity_ids,
            trajectories,
        }
    }

    /// Stores `result` in slot `entity`. Each slot is written once.
    pub fn record(&mut self, entity: usize, result: EntityResult) {
        let Some(id) = self.entity_ids.get(entity) else {
            return;
        };
        let record = EntityRecord::from_result(id, &result);
        if let Some(series) = result.trajectories {
            for (key, matrix) in self.trajectories.iter_mut() {
                let Some(values) = series.get(&key.family) else {
                    continue;
                };
                match key.market {
                    Some(m) => matrix.fill(
                        entity,
                        values
                            .chunks(crate::domain::FCAS_MARKET_COUNT)
                            .map(|row| row[m.index()]),
                    ),
                    None => matrix.fill(entity, values.iter().copied()),
                }
            }
        }
        self.records[entity] = Some(record);
    }

    pub fn solved_count(&self) -> usize {
        self.records
            .iter()
            .flatten()
            .filter(|r| r.failure.is_none())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.iter().flatten().count() - self.solved_count()
    }

    pub fn total_cost(&self) -> f64 {
        self.records
            .iter()
            .flatten()
            .filter_map(|r| r.costs.total_net_cost)
            .sum()
    }
}

/// Result of a batch run, consumed by the result writer.
#[derive(Debug, Clone)]
pub struct OutputAggregate {
    /// One label per interval
    pub time_labels: Vec<String>,
    pub scenarios: Vec<ScenarioAggregate>,
}

impl OutputAggregate {
    pub fn new(grid: &TimeGrid, scenarios: Vec<ScenarioAggregate>) -> Self {
        Self {
            time_labels: (0..grid.interval_count()).map(|t| t.to_string()).collect(),
            scenarios,
        }
    }

    /// Replaces the default `0..n` labels; ignored if the length is wrong.
    pub fn with_time_labels(mut self, labels: Vec<String>) -> Self {
        if labels.len() == self.time_labels.len() {
            self.time_labels = labels;
        }
        self
    }

    /// Interval labels plus the closing boundary, for state-of-charge series.
    pub fn soc_labels(&self) -> Vec<String> {
        let mut labels = self.time_labels.clone();
        labels.push("end".to_string());
        labels
    }

    pub fn scenario(&self, configuration: &Configuration) -> Option<&ScenarioAggregate> {
        self.scenarios.iter().find(|s| &s.configuration == configuration)
    }
}
