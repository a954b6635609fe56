//! Benchmark sweep harness for TaoStore: generates the experiment matrix, filters it,
//! and runs every selected experiment, one at a time.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

pub mod env;
pub mod error;
pub mod experiment;
pub mod filter;
mod fsutil;
pub mod matrix;
pub mod medium;
pub mod process;
pub mod render;
pub mod supervisor;

pub use env::HarnessEnv;
pub use error::HarnessError;
pub use experiment::ExperimentConfig;
pub use medium::StorageMedium;
pub use supervisor::{run_experiment, ExperimentOutcome, ExperimentReport};

pub const DEFAULT_LOG_ROOT: &str = "./exp_data";

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub pattern: Option<String>,
    pub log_root: PathBuf,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            pattern: None,
            log_root: PathBuf::from(DEFAULT_LOG_ROOT),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub experiments: Vec<ExperimentReport>,
}

impl SweepReport {
    pub fn completed(&self) -> usize {
        self.experiments
            .iter()
            .filter(|e| !e.outcome.is_failure())
            .count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExperimentReport> {
        self.experiments.iter().filter(|e| e.outcome.is_failure())
    }
}

/// Generated, validated, filtered configurations with their log directories assigned.
pub fn plan_sweep(env: &HarnessEnv, options: &SweepOptions) -> Result<Vec<ExperimentConfig>> {
    let default = matrix::default_config(env.default_template());
    let configs = matrix::generate_configs(&default);
    for config in &configs {
        config
            .validate()
            .with_context(|| format!("invalid experiment {}", config.log_dir_name()))?;
    }
    let mut configs = filter::filter_configs(configs, options.pattern.as_deref());
    // Children run in env.working_dir, so every path handed to them must be absolute.
    let log_root = std::path::absolute(&options.log_root)
        .with_context(|| format!("cannot resolve log root {}", options.log_root.display()))?;
    for config in configs.iter_mut() {
        if let Some(medium) = config.storage {
            env.medium_path(medium)
                .with_context(|| format!("invalid experiment {}", config.log_dir_name()))?;
        }
        config.assign_log_directory(&log_root);
    }
    Ok(configs)
}

/// Runs the planned experiments sequentially. A client timeout is recorded and the sweep
/// moves on; any other error stops the sweep.
pub fn run_sweep(env: &HarnessEnv, options: &SweepOptions) -> Result<SweepReport> {
    let configs = plan_sweep(env, options)?;
    if configs.is_empty() {
        warn!("pattern {:?} selected no experiments", options.pattern);
    }
    let total = configs.len();
    let mut report = SweepReport::default();
    for (idx, config) in configs.into_iter().enumerate() {
        let name = config.log_dir_name();
        info!("experiment {}/{}: {}", idx + 1, total, name);
        let experiment = run_experiment(config, env)
            .with_context(|| format!("experiment {} aborted the sweep", name))?;
        if experiment.outcome.is_failure() {
            warn!("experiment {} failed", name);
        }
        report.experiments.push(experiment);
    }
    info!(
        "sweep finished: {} completed, {} failed",
        report.completed(),
        report.failed().count()
    );
    Ok(report)
}
