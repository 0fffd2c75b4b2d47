//! CSV/JSON result writer.
//!
//! Layout under the output root, one directory per scenario:
//!
//! ```text
//! aggregator/with_fcas/costs.csv
//! aggregator/with_fcas/energy_bids.csv
//! aggregator/with_fcas/Raise_FCAS_bids_fast.csv
//! ...
//! aggregator/with_fcas/summary.json
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{OutputAggregate, ScenarioAggregate, TrajectoryMatrix};
use crate::optimizer::Family;

const COST_HEADER: [&str; 12] = [
    "entity_id",
    "status",
    "proven_optimal",
    "total_net_cost",
    "energy_net_cost",
    "fcas_net_cost",
    "wholesale_reference_cost",
    "wall_time_s",
    "binary_vars",
    "continuous_vars",
    "constraints",
    "message",
];

const NA: &str = "NA";

/// Per-scenario run manifest written as `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub created_at: DateTime<Utc>,
    pub scenario: String,
    pub entities: usize,
    pub solved: usize,
    pub failed: usize,
    pub total_net_cost: f64,
    pub trajectory_files: Vec<String>,
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6}")).unwrap_or_else(|| NA.to_string())
}

fn fmt_value(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.6}")
    } else {
        NA.to_string()
    }
}

/// Writes the cost table of one scenario to any writer.
pub fn write_costs(scenario: &ScenarioAggregate, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(COST_HEADER)?;

    for (id, slot) in scenario.entity_ids.iter().zip(&scenario.records) {
        let Some(r) = slot else {
            wtr.write_record([id.as_str(), "NOT_RUN", "false", NA, NA, NA, NA, NA, NA, NA, NA, ""])?;
            continue;
        };
        wtr.write_record(&[
            r.entity_id.clone(),
            r.status.clone(),
            r.proven_optimal.to_string(),
            fmt_opt(r.costs.total_net_cost),
            fmt_opt(r.costs.energy_net_cost),
            fmt_opt(r.costs.fcas_net_cost),
            fmt_opt(r.costs.wholesale_reference_cost),
            format!("{:.3}", r.stats.wall_time_seconds),
            r.stats.binary_var_count.to_string(),
            r.stats.continuous_var_count.to_string(),
            r.stats.constraint_count.to_string(),
            r.message.clone().unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes one trajectory matrix: a `Time` column, then one column per entity.
pub fn write_trajectory(
    matrix: &TrajectoryMatrix,
    labels: &[String],
    entity_ids: &[String],
    writer: impl Write,
) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    let mut header = Vec::with_capacity(entity_ids.len() + 1);
    header.push("Time".to_string());
    header.extend(entity_ids.iter().cloned());
    wtr.write_record(&header)?;

    for row in 0..matrix.rows {
        let mut record = Vec::with_capacity(entity_ids.len() + 1);
        record.push(labels.get(row).cloned().unwrap_or_else(|| row.to_string()));
        record.extend(matrix.columns.iter().map(|col| fmt_value(col[row])));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<io::BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating '{}'", path.display()))?;
    Ok(io::BufWriter::new(file))
}

/// Writes every scenario of `output` below `root`; returns the scenario directories.
pub fn write_outputs(output: &OutputAggregate, root: &Path) -> Result<Vec<PathBuf>> {
    let soc_labels = output.soc_labels();
    let mut written = Vec::with_capacity(output.scenarios.len());

    for scenario in &output.scenarios {
        let label = scenario.configuration.label();
        let dir = root.join(&label);
        fs::create_dir_all(&dir).with_context(|| format!("creating output directory '{}'", dir.display()))?;

        let costs_path = dir.join("costs.csv");
        write_costs(scenario, create(&costs_path)?)
            .with_context(|| format!("writing '{}'", costs_path.display()))?;

        let mut trajectory_files = Vec::new();
        for (key, matrix) in &scenario.trajectories {
            // nothing solved for this family
            if matrix.columns.iter().flatten().all(|v| v.is_nan()) {
                continue;
            }
            let labels = if key.family == Family::StateOfCharge {
                &soc_labels
            } else {
                &output.time_labels
            };
            let name = format!("{}.csv", key.file_stem());
            let path = dir.join(&name);
            write_trajectory(matrix, labels, &scenario.entity_ids, create(&path)?)
                .with_context(|| format!("writing '{}'", path.display()))?;
            trajectory_files.push(name);
        }

        let summary = ScenarioSummary {
            created_at: Utc::now(),
            scenario: label.clone(),
            entities: scenario.entity_ids.len(),
            solved: scenario.solved_count(),
            failed: scenario.failed_count(),
            total_net_cost: scenario.total_cost(),
            trajectory_files,
        };
        let summary_path = dir.join("summary.json");
        let json = serde_json::to_string_pretty(&summary).context("serializing scenario summary to JSON")?;
        fs::write(&summary_path, json).with_context(|| format!("writing '{}'", summary_path.display()))?;

        info!(
            scenario = %label,
            dir = %dir.display(),
            solved = summary.solved,
            failed = summary.failed,
            "scenario outputs written"
        );
        written.push(dir);
    }

    Ok(written)
}
