use std::path::PathBuf;

use aggregator_bidding::batch::BatchRunner;
use aggregator_bidding::config::{Config, DEFAULT_CONFIG_PATH};
use aggregator_bidding::io::{load_portfolio, write_outputs};
use aggregator_bidding::optimizer::GoodLpSolver;
use aggregator_bidding::telemetry::init_tracing;
use anyhow::{Context, Result};
use tracing::{info, warn};

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading configuration from '{}'", config_path.display()))?;
    init_tracing(&cfg.telemetry);

    info!(config = %config_path.display(), variant = ?cfg.run.variant, "starting aggregator-bidding");

    let configs = cfg.run.configurations();
    let portfolio = load_portfolio(&cfg.data.source(), cfg.data_needs())
        .with_context(|| format!("loading data from '{}'", cfg.data.dir.display()))?;

    let (start, end) = cfg.run.entity_range(portfolio.entity_count());
    let entities = portfolio.entity_range(start, end)?;

    let solver = GoodLpSolver::new(cfg.solver.backend);
    let runner = BatchRunner::new(solver)
        .with_time_limit(cfg.solver.time_limit())
        .with_threads(cfg.run.threads);

    let output = runner
        .run(&entities, &portfolio.grid, &configs)
        .with_time_labels(portfolio.time_labels.clone());

    let dirs = write_outputs(&output, &cfg.output.dir)?;

    for scenario in &output.scenarios {
        let failed = scenario.failed_count();
        if failed > 0 {
            warn!(scenario = %scenario.configuration, failed, "some entities have no optimal plan");
        }
        info!(
            scenario = %scenario.configuration,
            solved = scenario.solved_count(),
            total_net_cost = scenario.total_cost(),
            "scenario summary"
        );
    }
    info!(directories = dirs.len(), output = %cfg.output.dir.display(), "run complete");
    Ok(())
}
