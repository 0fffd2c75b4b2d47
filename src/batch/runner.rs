use std::time::Duration;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, info_span, warn};

use super::aggregate::{OutputAggregate, ScenarioAggregate};
use crate::domain::{Configuration, EntityParameters, TimeGrid};
use crate::optimizer::{EntityResult, ModelBuilder, ResultExtractor, SolverAdapter};

/// Runs build, solve and extract for every (configuration, entity) pair.
///
/// Pairs are ordered configuration-major: all entities for the first
/// configuration, then all entities for the next. With more than one thread
/// the pairs are solved on a rayon pool; results are still collected in that
/// order, so every pair lands in its own slot.
pub struct BatchRunner<S> {
    solver: S,
    time_limit: Option<Duration>,
    /// 0 = one per CPU, 1 = sequential
    threads: usize,
}

impl<S: SolverAdapter> BatchRunner<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            time_limit: None,
            threads: 1,
        }
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// build -> solve -> extract for one pair. Never panics on bad data: a
    /// rejected entity comes back as a `DATA_INCONSISTENCY` result.
    pub fn solve_one(
        &self,
        entity: &EntityParameters,
        grid: &TimeGrid,
        config: &Configuration,
    ) -> EntityResult {
        let span = info_span!("solve", entity = %entity.id, scenario = %config);
        let _enter = span.enter();

        let instance = match ModelBuilder::build(entity, grid, config) {
            Ok(instance) => instance,
            Err(err) => {
                warn!(error = %err, "entity rejected before solve");
                return EntityResult::rejected(&err);
            }
        };

        let solved = self.solver.solve(&instance, self.time_limit);
        let result = ResultExtractor::extract(&instance, &solved, config);

        match result.failure {
            None => info!(
                status = %result.status_label(),
                wall_time_s = result.stats.wall_time_seconds,
                total_cost = result.costs.total_net_cost,
                "entity solved"
            ),
            Some(kind) => warn!(
                status = %result.status_label(),
                failure = %kind,
                wall_time_s = result.stats.wall_time_seconds,
                message = result.message.as_deref().unwrap_or(""),
                "entity not solved to optimality"
            ),
        }
        result
    }

    pub fn run(
        &self,
        entities: &[EntityParameters],
        grid: &TimeGrid,
        configs: &[Configuration],
    ) -> OutputAggregate {
        let ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        let mut scenarios: Vec<ScenarioAggregate> = configs
            .iter()
            .map(|c| ScenarioAggregate::new(*c, ids.clone(), grid))
            .collect();

        let pairs: Vec<(usize, usize)> = (0..configs.len())
            .flat_map(|c| (0..entities.len()).map(move |e| (c, e)))
            .collect();

        info!(
            entities = entities.len(),
            scenarios = configs.len(),
            solver = self.solver.name(),
            threads = self.threads,
            "batch started"
        );

        let results = self.solve_pairs(&pairs, entities, grid, configs);

        for ((c, e), result) in pairs.into_iter().zip(results) {
            scenarios[c].record(e, result);
        }

        for scenario in &scenarios {
            info!(
                scenario = %scenario.configuration,
                solved = scenario.solved_count(),
                failed = scenario.failed_count(),
                "scenario finished"
            );
        }

        OutputAggregate::new(grid, scenarios)
    }

    fn solve_pairs(
        &self,
        pairs: &[(usize, usize)],
        entities: &[EntityParameters],
        grid: &TimeGrid,
        configs: &[Configuration],
    ) -> Vec<EntityResult> {
        let solve = |&(c, e): &(usize, usize)| self.solve_one(&entities[e], grid, &configs[c]);

        if self.threads == 1 || pairs.len() <= 1 {
            return pairs.iter().map(solve).collect();
        }

        // num_threads(0) lets rayon pick one thread per CPU
        match ThreadPoolBuilder::new().num_threads(self.threads).build() {
            Ok(pool) => pool.install(|| pairs.par_iter().map(solve).collect()),
            Err(err) => {
                warn!(error = %err, "cannot build thread pool, solving sequentially");
                pairs.iter().map(solve).collect()
            }
        }
    }
}
