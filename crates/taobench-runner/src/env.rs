//! Harness environment: where the system under test lives and how to drive it.
//!
//! Every component takes a `&HarnessEnv` instead of reading process-wide constants.
//! `HarnessEnv::default()` describes the stock TaoStore checkout; a YAML file can
//! override any subset of fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, Result};
use crate::medium::StorageMedium;

const TAOSTORE_ROOT: &str = "/usr/local/src/TaoStore";
const TAOSTORE_CLASSPATH: &str = "./out/production/TaoStore:./libs/guava-19.0.jar:./libs/commons-math3-3.6.1.jar:./libs/junit-4.11.jar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoints {
    pub server: String,
    pub proxy: String,
    pub client: String,
}

impl Default for Entrypoints {
    fn default() -> Self {
        Self {
            server: "TaoServer.TaoServer".to_string(),
            proxy: "TaoProxy.TaoProxy".to_string(),
            client: "TaoClient.TaoClient".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessEnv {
    /// Working directory of every external command.
    pub working_dir: PathBuf,
    /// Directory holding `default.config`.
    pub template_dir: PathBuf,
    /// Program and leading arguments shared by server, proxy and client.
    pub launcher: Vec<String>,
    pub entrypoints: Entrypoints,
    /// Best-effort command that kills leftovers of a previous run.
    pub stray_kill_command: Vec<String>,
    /// Files shared across runs, relative to `working_dir`, removed before each run.
    pub stale_files: Vec<PathBuf>,
    /// Mandatory clean/build step run before each experiment.
    pub build_command: Vec<String>,
    pub client_timeout_secs: u64,
    pub drain_grace_ms: u64,
    pub medium_paths: BTreeMap<StorageMedium, PathBuf>,
}

impl Default for HarnessEnv {
    fn default() -> Self {
        let root = PathBuf::from(TAOSTORE_ROOT);
        let mut medium_paths = BTreeMap::new();
        medium_paths.insert(StorageMedium::Hdd, root.join("oram.txt"));
        medium_paths.insert(StorageMedium::Ssd, PathBuf::from("/mnt/ssd/oram.txt"));
        medium_paths.insert(StorageMedium::Memory, PathBuf::from("/tmp/oram.txt"));
        Self {
            template_dir: root.join("configs"),
            working_dir: root,
            launcher: vec![
                "java".to_string(),
                "--class-path".to_string(),
                TAOSTORE_CLASSPATH.to_string(),
            ],
            entrypoints: Entrypoints::default(),
            stray_kill_command: vec!["killall".to_string(), "-q".to_string(), "java".to_string()],
            stale_files: vec![PathBuf::from("oram.txt")],
            build_command: vec!["ant".to_string(), "clean".to_string(), "all".to_string()],
            client_timeout_secs: 240,
            drain_grace_ms: 2000,
            medium_paths,
        }
    }
}

impl HarnessEnv {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn default_template(&self) -> PathBuf {
        self.template_dir.join("default.config")
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Backing file for `medium`; a medium without an entry is a setup error.
    pub fn medium_path(&self, medium: StorageMedium) -> Result<&Path> {
        self.medium_paths
            .get(&medium)
            .map(PathBuf::as_path)
            .ok_or(HarnessError::UnmappedMedium(medium))
    }
}
