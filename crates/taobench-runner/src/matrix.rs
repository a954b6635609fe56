//! Sweep groups. Each group varies one axis around the default configuration.

use std::path::PathBuf;

use crate::experiment::ExperimentConfig;
use crate::medium::StorageMedium;

pub const STORAGE_TAG: &str = "storage";
pub const SCALABILITY_TAG: &str = "scalability";

const DEFAULT_NUM_BLOCKS: u64 = 1000;
const DEFAULT_NUM_OPERATIONS: u64 = 1000;
const DEFAULT_STORAGE: StorageMedium = StorageMedium::Hdd;

/// Client counts 2^0 ..= 2^4.
pub fn client_counts() -> Vec<u64> {
    (0..5).map(|exp| 1u64 << exp).collect()
}

pub fn default_config(template_path: impl Into<PathBuf>) -> ExperimentConfig {
    ExperimentConfig::new(template_path)
        .with_num_blocks(DEFAULT_NUM_BLOCKS)
        .with_num_operations(DEFAULT_NUM_OPERATIONS)
        .with_storage(DEFAULT_STORAGE)
}

pub fn storage_sweep(default: &ExperimentConfig) -> Vec<ExperimentConfig> {
    let mut configs = Vec::new();
    for medium in StorageMedium::ALL {
        for num_clients in client_counts() {
            configs.push(
                default
                    .clone()
                    .with_tag(STORAGE_TAG)
                    .with_storage(medium)
                    .with_num_clients(num_clients),
            );
        }
    }
    configs
}

pub fn scalability_sweep(default: &ExperimentConfig) -> Vec<ExperimentConfig> {
    client_counts()
        .into_iter()
        .map(|num_clients| {
            default
                .clone()
                .with_tag(SCALABILITY_TAG)
                .with_num_clients(num_clients)
        })
        .collect()
}

/// Storage group first, then scalability.
pub fn generate_configs(default: &ExperimentConfig) -> Vec<ExperimentConfig> {
    let mut configs = storage_sweep(default);
    configs.extend(scalability_sweep(default));
    configs
}
