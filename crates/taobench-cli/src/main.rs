use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use taobench_runner::{run_sweep, HarnessEnv, SweepOptions, SweepReport, DEFAULT_LOG_ROOT};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming a YAML file that overrides harness defaults.
const ENV_FILE_VAR: &str = "TAOBENCH_ENV";

#[derive(Parser)]
#[command(name = "taobench", version, about = "Run TaoStore benchmark sweeps")]
struct Cli {
    /// Only run experiments matching every `key@value` token, tokens joined by `__`
    #[arg(short, long)]
    patterns: Option<String>,

    /// Root directory for per-experiment logs
    #[arg(short, long, default_value = DEFAULT_LOG_ROOT)]
    logdir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taobench=info,taobench_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let env = load_env()?;
    let options = SweepOptions {
        pattern: cli.patterns,
        log_root: cli.logdir,
    };
    let report = run_sweep(&env, &options)?;
    print_summary(&report);
    Ok(())
}

fn load_env() -> Result<HarnessEnv> {
    match std::env::var_os(ENV_FILE_VAR) {
        Some(path) => {
            let path = PathBuf::from(path);
            info!("harness environment from {}", path.display());
            HarnessEnv::from_file(&path)
                .with_context(|| format!("failed to load {} from {}", ENV_FILE_VAR, path.display()))
        }
        None => Ok(HarnessEnv::default()),
    }
}

fn print_summary(report: &SweepReport) {
    println!("experiments: {}", report.experiments.len());
    println!("completed: {}", report.completed());
    println!("failed: {}", report.failed().count());
    for experiment in report.failed() {
        println!("failed: {}", experiment.log_directory.display());
    }
}
