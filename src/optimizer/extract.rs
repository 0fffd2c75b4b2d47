use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::instance::{CostTerm, Family, MilpInstance};
use super::solver::{SolveResult, SolveStatus, SolverStats};
use crate::domain::Configuration;
use crate::error::{FailureKind, ModelError};

/// Per-entity cost figures in $. `None` means unavailable, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total_net_cost: Option<f64>,
    pub energy_net_cost: Option<f64>,
    pub fcas_net_cost: Option<f64>,
    pub wholesale_reference_cost: Option<f64>,
}

impl CostBreakdown {
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.total_net_cost.is_some()
    }
}

/// Domain-level outcome of one (entity, configuration) solve.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityResult {
    /// Solver termination status. An entity rejected before the solve
    /// carries `SolverError` with `failure = DataInconsistency`; read
    /// `failure` or `status_label` to tell the two apart.
    pub status: SolveStatus,
    pub failure: Option<FailureKind>,
    pub proven_optimal: bool,
    pub costs: CostBreakdown,
    pub stats: SolverStats,
    /// Present only when trajectories were requested and an assignment exists
    pub trajectories: Option<BTreeMap<Family, Vec<f64>>>,
    pub message: Option<String>,
}

impl EntityResult {
    /// Result for an entity rejected before any solve. No solver ran, so
    /// `failure` is the authoritative outcome, not `status`.
    pub fn rejected(err: &ModelError) -> Self {
        Self {
            status: SolveStatus::SolverError,
            failure: Some(FailureKind::DataInconsistency),
            proven_optimal: false,
            costs: CostBreakdown::unavailable(),
            stats: SolverStats::default(),
            trajectories: None,
            message: Some(err.to_string()),
        }
    }

    /// Label written to result tables, e.g. `OPTIMAL` or `DATA_INCONSISTENCY`.
    pub fn status_label(&self) -> String {
        if self.is_rejected() {
            "DATA_INCONSISTENCY".to_string()
        } else {
            self.status.to_string()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.status == SolveStatus::Optimal
    }

    /// True when the entity never reached a solver.
    pub fn is_rejected(&self) -> bool {
        self.failure == Some(FailureKind::DataInconsistency)
    }
}

/// Maps solver output back onto costs and trajectories.
pub struct ResultExtractor;

impl ResultExtractor {
    pub fn extract(instance: &MilpInstance, result: &SolveResult, config: &Configuration) -> EntityResult {
        let failure = match result.status {
            SolveStatus::Optimal => None,
            SolveStatus::Infeasible => Some(FailureKind::InfeasibleModel),
            SolveStatus::Unbounded => Some(FailureKind::UnboundedModel),
            SolveStatus::Timeout => Some(FailureKind::SolverTimeout),
            SolveStatus::SolverError => Some(FailureKind::SolverUnavailable),
        };

        let usable = matches!(result.status, SolveStatus::Optimal | SolveStatus::Timeout)
            && result.has_assignment();
        let flat = if usable {
            instance.flatten_values(&result.values)
        } else {
            None
        };

        let Some(flat) = flat else {
            return EntityResult {
                status: result.status,
                failure,
                proven_optimal: false,
                costs: CostBreakdown::unavailable(),
                stats: result.stats,
                trajectories: None,
                message: result.message.clone(),
            };
        };

        let term = |t: CostTerm| instance.report(t).map(|expr| expr.evaluate(&flat));
        let costs = if config.is_retail() {
            let tariff = term(CostTerm::Tariff);
            CostBreakdown {
                total_net_cost: tariff,
                energy_net_cost: tariff,
                fcas_net_cost: Some(0.0),
                wholesale_reference_cost: term(CostTerm::WholesaleReference),
            }
        } else {
            let energy = term(CostTerm::Energy);
            let fcas = term(CostTerm::Fcas).unwrap_or(0.0);
            CostBreakdown {
                total_net_cost: energy.map(|e| e + fcas),
                energy_net_cost: energy,
                fcas_net_cost: Some(fcas),
                wholesale_reference_cost: term(CostTerm::WholesaleReference),
            }
        };

        let trajectories = config.save_trajectories.then(|| {
            let mut series = result.values.clone();
            if let Some(tau) = series.get_mut(&Family::ChargeMode) {
                tau.iter_mut().for_each(|v| *v = v.round());
            }
            series
        });

        EntityResult {
            status: result.status,
            failure,
            proven_optimal: result.proven_optimal && result.status == SolveStatus::Optimal,
            costs,
            stats: result.stats,
            trajectories,
            message: result.message.clone(),
        }
    }
}
