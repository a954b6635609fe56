//! Materializes `experiment.config` for one run.
//!
//! The template is a list of `key=value` lines. Only the override keys are touched;
//! each must appear on exactly one line, otherwise rendering fails rather than guessing
//! which line was meant.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::env::HarnessEnv;
use crate::error::{HarnessError, Result};
use crate::experiment::ExperimentConfig;
use crate::fsutil::ensure_dir;

pub const RENDERED_CONFIG_FILE: &str = "experiment.config";

pub const LOG_DIRECTORY_KEY: &str = "log_directory";
pub const PROXY_THREAD_COUNT_KEY: &str = "proxy_thread_count";
pub const ORAM_FILE_KEY: &str = "oram_file";

/// A configuration whose artifact is on disk. Read-only from here on.
#[derive(Debug, Clone)]
pub struct RenderedExperiment {
    config: ExperimentConfig,
    log_directory: PathBuf,
    config_file: PathBuf,
}

impl RenderedExperiment {
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn log_directory(&self) -> &Path {
        &self.log_directory
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn name(&self) -> String {
        self.config.log_dir_name()
    }
}

fn line_key(line: &str) -> Option<&str> {
    line.split_once('=').map(|(key, _)| key.trim())
}

/// Replaces the single `key=...` line for every override; other lines are copied verbatim.
pub fn apply_overrides(
    template: &str,
    template_path: &Path,
    overrides: &[(&str, String)],
) -> Result<String> {
    let mut lines: Vec<String> = template.split_inclusive('\n').map(str::to_string).collect();
    for (key, value) in overrides {
        let hits: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line_key(line) == Some(*key))
            .map(|(idx, _)| idx)
            .collect();
        match hits.as_slice() {
            [] => {
                return Err(HarnessError::TemplateKeyMissing {
                    path: template_path.to_path_buf(),
                    key: key.to_string(),
                })
            }
            [idx] => {
                let line = &lines[*idx];
                let terminator = if line.ends_with("\r\n") {
                    "\r\n"
                } else if line.ends_with('\n') {
                    "\n"
                } else {
                    ""
                };
                lines[*idx] = format!("{}={}{}", key, value, terminator);
            }
            many => {
                return Err(HarnessError::TemplateKeyDuplicated {
                    path: template_path.to_path_buf(),
                    key: key.to_string(),
                    lines: many.iter().map(|idx| idx + 1).collect(),
                })
            }
        }
    }
    Ok(lines.concat())
}

pub fn overrides_for(
    config: &ExperimentConfig,
    log_directory: &Path,
    env: &HarnessEnv,
) -> Result<Vec<(&'static str, String)>> {
    let mut overrides = vec![
        (LOG_DIRECTORY_KEY, log_directory.display().to_string()),
        (PROXY_THREAD_COUNT_KEY, config.require_num_clients()?.to_string()),
    ];
    if let Some(medium) = config.storage {
        let path = env.medium_path(medium)?;
        overrides.push((ORAM_FILE_KEY, path.display().to_string()));
    }
    Ok(overrides)
}

/// Creates the log directory, writes the rendered template into it and freezes the config.
pub fn render_experiment(
    mut config: ExperimentConfig,
    env: &HarnessEnv,
) -> Result<RenderedExperiment> {
    let log_directory = config
        .log_directory
        .as_deref()
        .ok_or(HarnessError::MissingField(LOG_DIRECTORY_KEY))?;
    // The processes reading this run in env.working_dir.
    let log_directory = std::path::absolute(log_directory)?;
    config.log_directory = Some(log_directory.clone());
    let overrides = overrides_for(&config, &log_directory, env)?;
    ensure_dir(&log_directory)?;

    let template = fs::read_to_string(&config.template_path)?;
    let rendered = apply_overrides(&template, &config.template_path, &overrides)?;

    let config_file = log_directory.join(RENDERED_CONFIG_FILE);
    fs::write(&config_file, rendered)?;
    debug!("rendered {}", config_file.display());

    Ok(RenderedExperiment {
        config,
        log_directory,
        config_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::scratch_dir;
    use crate::matrix::default_config;
    use crate::medium::StorageMedium;

    const TEMPLATE: &str = "\
# TaoStore settings
oram_file=oram.txt
proxy_thread_count=1
server_port=12345
log_directory=logs
write_back_threshold = 40
";

    #[test]
    fn unrelated_lines_are_byte_identical() {
        let out = apply_overrides(
            TEMPLATE,
            Path::new("t.config"),
            &[(PROXY_THREAD_COUNT_KEY, "8".to_string())],
        )
        .expect("render");
        let before: Vec<&str> = TEMPLATE.lines().collect();
        let after: Vec<&str> = out.lines().collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            if line_key(b) == Some(PROXY_THREAD_COUNT_KEY) {
                assert_eq!(*a, "proxy_thread_count=8");
            } else {
                assert_eq!(a, b);
            }
        }
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn key_match_is_exact_not_substring() {
        let template = "old_log_directory=x\nlog_directory=y\n";
        let out = apply_overrides(
            template,
            Path::new("t.config"),
            &[(LOG_DIRECTORY_KEY, "/tmp/out".to_string())],
        )
        .expect("render");
        assert_eq!(out, "old_log_directory=x\nlog_directory=/tmp/out\n");
    }

    #[test]
    fn missing_key_is_an_error() {
        let err = apply_overrides(
            "server_port=1\n",
            Path::new("t.config"),
            &[(ORAM_FILE_KEY, "/tmp/oram.txt".to_string())],
        )
        .expect_err("missing key");
        assert!(matches!(err, HarnessError::TemplateKeyMissing { ref key, .. } if key == "oram_file"));
    }

    #[test]
    fn duplicated_key_is_an_error_naming_lines() {
        let err = apply_overrides(
            "proxy_thread_count=1\nx=2\nproxy_thread_count=3\n",
            Path::new("t.config"),
            &[(PROXY_THREAD_COUNT_KEY, "4".to_string())],
        )
        .expect_err("duplicate key");
        match err {
            HarnessError::TemplateKeyDuplicated { lines, .. } => assert_eq!(lines, vec![1, 3]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn renders_ssd_storage_experiment_into_its_log_directory() {
        let root = scratch_dir("render");
        let template_path = root.join("default.config");
        fs::write(&template_path, TEMPLATE).expect("template");
        let log_root = root.join("exp_data");

        let mut config = default_config(&template_path)
            .with_tag("storage")
            .with_storage(StorageMedium::Ssd)
            .with_num_clients(4);
        config.assign_log_directory(&log_root);

        let env = HarnessEnv::default();
        let rendered = render_experiment(config, &env).expect("render");
        let expected_dir = log_root
            .join("tag@storage__num_blocks@1000__num_clients@4__num_operations@1000__storage@ssd");
        assert_eq!(rendered.log_directory(), expected_dir.as_path());
        assert_eq!(rendered.config_file(), expected_dir.join("experiment.config").as_path());

        let text = fs::read_to_string(rendered.config_file()).expect("rendered file");
        assert!(text.contains("proxy_thread_count=4\n"), "{}", text);
        assert!(text.contains("oram_file=/mnt/ssd/oram.txt\n"), "{}", text);
        assert!(
            text.contains(&format!("log_directory={}\n", expected_dir.display())),
            "{}",
            text
        );
        assert!(text.contains("write_back_threshold = 40\n"));

        // Rendering the same experiment again reuses the directory.
        let mut again = default_config(&template_path)
            .with_tag("storage")
            .with_storage(StorageMedium::Ssd)
            .with_num_clients(4);
        again.assign_log_directory(&log_root);
        render_experiment(again, &env).expect("second render");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn oram_file_untouched_without_storage() {
        let root = scratch_dir("render_nostorage");
        let template_path = root.join("default.config");
        fs::write(&template_path, "proxy_thread_count=1\nlog_directory=x\n").expect("template");
        let mut config = ExperimentConfig::new(&template_path)
            .with_tag("scalability")
            .with_num_clients(2);
        config.assign_log_directory(&root.join("exp_data"));
        let rendered = render_experiment(config, &HarnessEnv::default())
            .expect("no oram_file line is needed without a storage medium");
        let text = fs::read_to_string(rendered.config_file()).expect("rendered");
        assert!(text.starts_with("proxy_thread_count=2\n"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn relative_log_directory_is_rendered_absolute() {
        let root = scratch_dir("render_relative");
        let template_path = root.join("default.config");
        fs::write(&template_path, TEMPLATE).expect("template");
        let relative = PathBuf::from(format!("target/taobench_render_{}", std::process::id()));
        let mut config = default_config(&template_path).with_num_clients(1);
        config.assign_log_directory(&relative);

        let rendered = render_experiment(config, &HarnessEnv::default()).expect("render");
        let text = fs::read_to_string(rendered.config_file()).expect("rendered");
        let _ = fs::remove_dir_all(&relative);
        let _ = fs::remove_dir_all(root);

        let cwd = std::env::current_dir().expect("cwd");
        assert!(rendered.log_directory().starts_with(&cwd));
        assert!(rendered.config_file().is_absolute());
        assert_eq!(
            rendered.config().log_directory.as_deref(),
            Some(rendered.log_directory())
        );
        assert!(
            text.contains(&format!("log_directory={}\n", rendered.log_directory().display())),
            "{}",
            text
        );
    }

    #[test]
    fn unmapped_medium_is_fatal() {
        let mut env = HarnessEnv::default();
        env.medium_paths.remove(&StorageMedium::Memory);
        let mut config = default_config("unused.config")
            .with_storage(StorageMedium::Memory)
            .with_num_clients(1);
        config.assign_log_directory(Path::new("/nonexistent/exp_data"));
        let err = render_experiment(config, &env).expect_err("memory has no path");
        assert!(matches!(err, HarnessError::UnmappedMedium(StorageMedium::Memory)));
    }
}
