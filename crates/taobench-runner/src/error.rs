use std::path::PathBuf;

use crate::medium::StorageMedium;

#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("no backing path configured for storage medium '{0}'")]
    UnmappedMedium(StorageMedium),

    #[error("unknown storage medium '{0}' (expected memory, ssd or hdd)")]
    UnknownMedium(String),

    #[error("experiment is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be a positive integer (got {value})")]
    InvalidField { field: &'static str, value: u64 },

    #[error("template {} has no '{key}=' line", path.display())]
    TemplateKeyMissing { path: PathBuf, key: String },

    #[error("template {} sets '{key}' more than once (lines {lines:?})", path.display())]
    TemplateKeyDuplicated {
        path: PathBuf,
        key: String,
        lines: Vec<usize>,
    },

    #[error("command is empty: {0}")]
    EmptyCommand(&'static str),

    #[error("failed to spawn {role}: {source}")]
    Spawn {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build step `{command}` failed with {status}")]
    BuildStepFailed { command: String, status: String },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
