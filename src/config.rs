use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::domain::{Configuration, TARIFF_COUNT};
use crate::io::{DataFiles, DataNeeds, DataSource};
use crate::optimizer::SolverBackend;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "AGG__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub solver: SolverConfig,
    pub data: DataConfig,
    pub output: OutputConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    #[default]
    AggregatorBid,
    RetailBid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub variant: VariantKind,
    pub start_entity: usize,
    /// Inclusive; unset runs to the last loaded entity
    pub end_entity: Option<usize>,
    pub fcas_enabled: bool,
    pub tariff_indices: Vec<usize>,
    pub save_trajectories: bool,
    /// 0 = one per CPU, 1 = sequential
    pub threads: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            variant: VariantKind::AggregatorBid,
            start_entity: 0,
            end_entity: None,
            fcas_enabled: true,
            tariff_indices: (0..TARIFF_COUNT).collect(),
            save_trajectories: false,
            threads: 1,
        }
    }
}

impl RunConfig {
    /// Scenarios to run, in order.
    pub fn configurations(&self) -> Vec<Configuration> {
        let configs = match self.variant {
            VariantKind::AggregatorBid => vec![Configuration::aggregator(self.fcas_enabled)],
            VariantKind::RetailBid => self
                .tariff_indices
                .iter()
                .map(|k| Configuration::retail(*k))
                .collect(),
        };
        configs
            .into_iter()
            .map(|c| c.with_trajectories(self.save_trajectories))
            .collect()
    }

    /// Inclusive entity range, clamped to `entity_count`.
    pub fn entity_range(&self, entity_count: usize) -> (usize, usize) {
        let last = entity_count.saturating_sub(1);
        (self.start_entity, self.end_entity.unwrap_or(last).min(last))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: SolverBackend,
    pub time_limit_seconds: Option<f64>,
}

impl SolverConfig {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_seconds.map(Duration::from_secs_f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
    pub files: DataFiles,
    pub horizon_hours: f64,
    /// 0.001 converts $/MWh price files to $/kWh
    pub price_scale: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            files: DataFiles::default(),
            horizon_hours: 8760.0,
            price_scale: 1.0,
        }
    }
}

impl DataConfig {
    pub fn source(&self) -> DataSource {
        DataSource {
            dir: self.dir.clone(),
            files: self.files.clone(),
            horizon_hours: self.horizon_hours,
            price_scale: self.price_scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub json_logs: bool,
}

impl Config {
    /// Defaults, then the TOML file at `path` (if present), then `AGG__` environment overrides.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(end) = self.run.end_entity {
            ensure!(
                self.run.start_entity <= end,
                "run.start_entity ({}) is after run.end_entity ({end})",
                self.run.start_entity
            );
        }
        if self.run.variant == VariantKind::RetailBid {
            ensure!(!self.run.tariff_indices.is_empty(), "run.tariff_indices is empty");
            for k in &self.run.tariff_indices {
                ensure!(*k < TARIFF_COUNT, "tariff index {k} outside 0..{TARIFF_COUNT}");
            }
        }
        ensure!(
            self.data.horizon_hours.is_finite() && self.data.horizon_hours > 0.0,
            "data.horizon_hours must be positive"
        );
        ensure!(
            self.data.price_scale.is_finite() && self.data.price_scale > 0.0,
            "data.price_scale must be positive"
        );
        if let Some(limit) = self.solver.time_limit_seconds {
            ensure!(
                limit.is_finite() && limit > 0.0,
                "solver.time_limit_seconds must be positive"
            );
            ensure!(
                self.solver.backend.supports_time_limit(),
                "solver backend '{}' cannot enforce solver.time_limit_seconds",
                self.solver.backend
            );
        }
        ensure!(
            self.solver.backend.is_available(),
            "solver backend '{}' is not compiled in",
            self.solver.backend
        );
        Ok(())
    }

    pub fn data_needs(&self) -> DataNeeds {
        DataNeeds::for_configs(&self.run.configurations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> Result<Config> {
        Config::from_figment(Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(text)))
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg.run.variant, VariantKind::AggregatorBid);
        assert_eq!(cfg.run.tariff_indices, vec![0, 1, 2, 3]);
        assert_eq!(cfg.data.horizon_hours, 8760.0);
        assert_eq!(cfg.solver.backend, SolverBackend::MicroLp);
    }

    #[test]
    fn test_retail_run_expands_tariffs() {
        let cfg = from_toml(
            r#"
            [run]
            variant = "retail_bid"
            tariff_indices = [2, 0]
            save_trajectories = true
            "#,
        )
        .unwrap();
        let configs = cfg.run.configurations();
        assert_eq!(configs, vec![
            Configuration::retail(2).with_trajectories(true),
            Configuration::retail(0).with_trajectories(true),
        ]);
        assert_eq!(cfg.solver.time_limit(), None);
        assert!(cfg.data_needs().tariffs);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(from_toml("[run]\nstart_entity = 5\nend_entity = 2").is_err());
        assert!(from_toml("[run]\nvariant = \"retail_bid\"\ntariff_indices = [4]").is_err());
        assert!(from_toml("[data]\nhorizon_hours = 0").is_err());
        assert!(from_toml("[solver]\ntime_limit_seconds = -1").is_err());
    }

    #[test]
    fn test_time_limit_needs_a_backend_that_enforces_it() {
        let err = from_toml("[solver]\nbackend = \"microlp\"\ntime_limit_seconds = 30").unwrap_err();
        assert!(err.to_string().contains("cannot enforce"), "{err}");
    }

    #[cfg(feature = "highs")]
    #[test]
    fn test_highs_accepts_time_limit() {
        let cfg = from_toml("[solver]\nbackend = \"highs\"\ntime_limit_seconds = 30").unwrap();
        assert_eq!(cfg.solver.time_limit(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_entity_range_is_clamped() {
        let run = RunConfig {
            start_entity: 1,
            end_entity: Some(50),
            ..RunConfig::default()
        };
        assert_eq!(run.entity_range(10), (1, 9));
        assert_eq!(RunConfig::default().entity_range(4), (0, 3));
    }
}
