//! The experiment configuration record and its deterministic log-directory name.

use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::medium::StorageMedium;

/// Joins `field@value` pairs inside a log-directory name and a filter pattern.
pub const PAIR_SEPARATOR: &str = "__";
pub const KEY_VALUE_SEPARATOR: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ConfigFile,
    Tag,
    NumBlocks,
    NumClients,
    NumOperations,
    Storage,
}

/// Fields that make up a log-directory name, in naming order.
pub const LOG_DIR_FIELDS: [Field; 5] = [
    Field::Tag,
    Field::NumBlocks,
    Field::NumClients,
    Field::NumOperations,
    Field::Storage,
];

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Field::ConfigFile => "config_file",
            Field::Tag => "tag",
            Field::NumBlocks => "num_blocks",
            Field::NumClients => "num_clients",
            Field::NumOperations => "num_operations",
            Field::Storage => "storage",
        }
    }

    pub fn from_key(key: &str) -> Option<Field> {
        match key {
            "config_file" => Some(Field::ConfigFile),
            "tag" => Some(Field::Tag),
            "num_blocks" => Some(Field::NumBlocks),
            "num_clients" => Some(Field::NumClients),
            "num_operations" => Some(Field::NumOperations),
            "storage" => Some(Field::Storage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentConfig {
    pub template_path: PathBuf,
    pub tag: Option<String>,
    pub num_blocks: Option<u64>,
    pub num_clients: Option<u64>,
    pub num_operations: Option<u64>,
    pub storage: Option<StorageMedium>,
    pub log_directory: Option<PathBuf>,
}

impl ExperimentConfig {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            tag: None,
            num_blocks: None,
            num_clients: None,
            num_operations: None,
            storage: None,
            log_directory: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_num_blocks(mut self, n: u64) -> Self {
        self.num_blocks = Some(n);
        self
    }

    pub fn with_num_clients(mut self, n: u64) -> Self {
        self.num_clients = Some(n);
        self
    }

    pub fn with_num_operations(mut self, n: u64) -> Self {
        self.num_operations = Some(n);
        self
    }

    pub fn with_storage(mut self, medium: StorageMedium) -> Self {
        self.storage = Some(medium);
        self
    }

    /// Rejects zero counts and an empty template path.
    pub fn validate(&self) -> Result<()> {
        if self.template_path.as_os_str().is_empty() {
            return Err(HarnessError::MissingField(Field::ConfigFile.key()));
        }
        for (field, value) in [
            (Field::NumBlocks, self.num_blocks),
            (Field::NumClients, self.num_clients),
            (Field::NumOperations, self.num_operations),
        ] {
            if value == Some(0) {
                return Err(HarnessError::InvalidField {
                    field: field.key(),
                    value: 0,
                });
            }
        }
        Ok(())
    }

    /// Canonical string form of a present field: decimal integers, lower-case media.
    pub fn field_value(&self, field: Field) -> Option<String> {
        match field {
            Field::ConfigFile => Some(self.template_path.display().to_string()),
            Field::Tag => self.tag.clone(),
            Field::NumBlocks => self.num_blocks.map(|n| n.to_string()),
            Field::NumClients => self.num_clients.map(|n| n.to_string()),
            Field::NumOperations => self.num_operations.map(|n| n.to_string()),
            Field::Storage => self.storage.map(|m| m.as_str().to_string()),
        }
    }

    pub fn log_dir_name(&self) -> String {
        LOG_DIR_FIELDS
            .iter()
            .filter_map(|field| {
                self.field_value(*field)
                    .map(|value| format!("{}{}{}", field.key(), KEY_VALUE_SEPARATOR, value))
            })
            .collect::<Vec<_>>()
            .join(PAIR_SEPARATOR)
    }

    pub fn log_directory_under(&self, root: &Path) -> PathBuf {
        let name = self.log_dir_name();
        if name.is_empty() {
            root.to_path_buf()
        } else {
            root.join(name)
        }
    }

    pub fn assign_log_directory(&mut self, root: &Path) {
        self.log_directory = Some(self.log_directory_under(root));
    }

    pub fn require_num_clients(&self) -> Result<u64> {
        self.num_clients
            .ok_or(HarnessError::MissingField(Field::NumClients.key()))
    }

    pub fn require_num_blocks(&self) -> Result<u64> {
        self.num_blocks
            .ok_or(HarnessError::MissingField(Field::NumBlocks.key()))
    }

    pub fn require_num_operations(&self) -> Result<u64> {
        self.num_operations
            .ok_or(HarnessError::MissingField(Field::NumOperations.key()))
    }
}
