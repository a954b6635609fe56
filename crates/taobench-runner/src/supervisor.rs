//! One experiment, end to end: reset the environment, render the configuration, run
//! server, proxy and client, then tear everything down and persist the logs.
//!
//! Phases: Init -> Reset -> Rendered -> Running -> (ClientDone | ClientTimeout)
//! -> Terminating -> Logged -> Done. A client timeout fails the experiment but not the
//! sweep. Every other error is fatal; process handles still kill their processes as they
//! go out of scope on that path.

use chrono::Utc;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::env::HarnessEnv;
use crate::error::{HarnessError, Result};
use crate::experiment::ExperimentConfig;
use crate::fsutil::atomic_write_json_pretty;
use crate::process::{ProcessHandle, ProcessState, Role, WaitOutcome};
use crate::render::{render_experiment, RenderedExperiment};

pub const RUN_STATE_FILE: &str = "run_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Reset,
    Rendered,
    Running,
    ClientDone,
    ClientTimeout,
    Terminating,
    Logged,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentOutcome {
    Completed { exit_code: Option<i32> },
    ClientTimedOut,
}

impl ExperimentOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExperimentOutcome::ClientTimedOut)
    }

    fn status(&self) -> &'static str {
        match self {
            ExperimentOutcome::Completed { .. } => "completed",
            ExperimentOutcome::ClientTimedOut => "failed",
        }
    }

    fn exit_reason(&self) -> Option<&'static str> {
        match self {
            ExperimentOutcome::Completed { .. } => None,
            ExperimentOutcome::ClientTimedOut => Some("client_timeout"),
        }
    }

    fn client_exit_code(&self) -> Option<i32> {
        match self {
            ExperimentOutcome::Completed { exit_code } => *exit_code,
            ExperimentOutcome::ClientTimedOut => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub role: Role,
    pub pid: u32,
    pub final_state: ProcessState,
}

#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub name: String,
    pub log_directory: PathBuf,
    pub outcome: ExperimentOutcome,
    pub logs: Vec<PathBuf>,
    pub processes: Vec<ProcessSummary>,
    pub phases: Vec<RunPhase>,
}

struct PhaseTrail {
    name: String,
    phases: Vec<RunPhase>,
}

impl PhaseTrail {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phases: vec![RunPhase::Init],
        }
    }

    fn advance(&mut self, phase: RunPhase) {
        debug!("{}: {:?}", self.name, phase);
        self.phases.push(phase);
    }
}

fn write_run_state(
    log_directory: &Path,
    experiment: &str,
    status: &str,
    exit_reason: Option<&str>,
    client_exit_code: Option<i32>,
) -> Result<()> {
    let payload = json!({
        "schema_version": "run_state_v1",
        "experiment": experiment,
        "status": status,
        "exit_reason": exit_reason,
        "client_exit_code": client_exit_code,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&log_directory.join(RUN_STATE_FILE), &payload)
}

/// Marks the run `failed`/`aborted` unless it is completed explicitly.
struct RunStateGuard {
    log_directory: PathBuf,
    experiment: String,
    done: bool,
}

impl RunStateGuard {
    fn start(rendered: &RenderedExperiment) -> Result<Self> {
        let experiment = rendered.name();
        write_run_state(rendered.log_directory(), &experiment, "running", None, None)?;
        Ok(Self {
            log_directory: rendered.log_directory().to_path_buf(),
            experiment,
            done: false,
        })
    }

    fn complete(&mut self, outcome: &ExperimentOutcome) -> Result<()> {
        write_run_state(
            &self.log_directory,
            &self.experiment,
            outcome.status(),
            outcome.exit_reason(),
            outcome.client_exit_code(),
        )?;
        self.done = true;
        Ok(())
    }
}

impl Drop for RunStateGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_run_state(
                &self.log_directory,
                &self.experiment,
                "failed",
                Some("aborted"),
                None,
            );
        }
    }
}

fn kill_strays(env: &HarnessEnv) {
    let Some((program, args)) = env.stray_kill_command.split_first() else {
        return;
    };
    match Command::new(program)
        .args(args)
        .current_dir(&env.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => debug!("stray cleanup exited with {}", status),
        Err(err) => debug!("stray cleanup not run: {}", err),
    }
}

fn remove_stale_files(env: &HarnessEnv) -> Result<()> {
    for file in &env.stale_files {
        let path = env.working_dir.join(file);
        match fs::remove_file(&path) {
            Ok(()) => debug!("removed stale {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn run_build_step(env: &HarnessEnv) -> Result<()> {
    let Some((program, args)) = env.build_command.split_first() else {
        debug!("no build command configured");
        return Ok(());
    };
    let command = env.build_command.join(" ");
    info!("build: {}", command);
    let status = Command::new(program)
        .args(args)
        .current_dir(&env.working_dir)
        .stdin(Stdio::null())
        .status()
        .map_err(|source| HarnessError::Spawn {
            role: "build step".to_string(),
            source,
        })?;
    if !status.success() {
        return Err(HarnessError::BuildStepFailed {
            command,
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Clears what a previous run may have left behind. Only the build step can fail hard.
pub fn reset_environment(env: &HarnessEnv) -> Result<()> {
    kill_strays(env);
    remove_stale_files(env)?;
    run_build_step(env)
}

/// Full argv for `role`: launcher, entrypoint, config file, and the client's load options.
pub fn process_command(
    env: &HarnessEnv,
    role: Role,
    rendered: &RenderedExperiment,
) -> Result<Vec<String>> {
    let entrypoint = match role {
        Role::Server => &env.entrypoints.server,
        Role::Proxy => &env.entrypoints.proxy,
        Role::Client => &env.entrypoints.client,
    };
    let mut argv = env.launcher.clone();
    argv.push(entrypoint.clone());
    argv.push("--config_file".to_string());
    argv.push(rendered.config_file().display().to_string());
    if role == Role::Client {
        let config = rendered.config();
        argv.extend([
            "--runType".to_string(),
            "load_test".to_string(),
            "--load_test_type".to_string(),
            "asynchronous".to_string(),
            "--load_size".to_string(),
            config.require_num_operations()?.to_string(),
            "--data_set_size".to_string(),
            config.require_num_blocks()?.to_string(),
        ]);
    }
    Ok(argv)
}

fn persist_log(log_directory: &Path, role: Role, bytes: &[u8]) -> Result<PathBuf> {
    let path = log_directory.join(role.log_file_name());
    fs::write(&path, bytes)?;
    debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

fn summarize(handle: &ProcessHandle) -> ProcessSummary {
    ProcessSummary {
        role: handle.role(),
        pid: handle.pid(),
        final_state: handle.state(),
    }
}

struct Supervised {
    outcome: ExperimentOutcome,
    logs: Vec<PathBuf>,
    processes: Vec<ProcessSummary>,
}

/// Starts server, proxy and client in that order and always tears server and proxy down.
fn supervise(
    rendered: &RenderedExperiment,
    env: &HarnessEnv,
    trail: &mut PhaseTrail,
) -> Result<Supervised> {
    let commands = Role::START_ORDER
        .iter()
        .map(|role| process_command(env, *role, rendered))
        .collect::<Result<Vec<_>>>()?;

    let mut server = ProcessHandle::spawn(Role::Server, &commands[0], &env.working_dir)?;
    info!("{}: server started (pid {})", trail.name, server.pid());
    debug!("server command: {}", server.command_line());
    let mut proxy = ProcessHandle::spawn(Role::Proxy, &commands[1], &env.working_dir)?;
    info!("{}: proxy started (pid {})", trail.name, proxy.pid());
    debug!("proxy command: {}", proxy.command_line());
    let mut client = ProcessHandle::spawn(Role::Client, &commands[2], &env.working_dir)?;
    info!("{}: client started (pid {})", trail.name, client.pid());
    debug!("client command: {}", client.command_line());
    trail.advance(RunPhase::Running);

    let log_directory = rendered.log_directory();
    let grace = env.drain_grace();
    let mut logs = Vec::new();

    let outcome = match client.wait_timeout(env.client_timeout())? {
        WaitOutcome::Exited(status) => {
            trail.advance(RunPhase::ClientDone);
            if !status.success() {
                warn!("{}: client exited with {}", trail.name, status);
            }
            // Anything the client left running in its group goes too.
            client.kill();
            let output = client.drain(grace);
            logs.push(persist_log(log_directory, Role::Client, &output)?);
            ExperimentOutcome::Completed {
                exit_code: status.code(),
            }
        }
        WaitOutcome::TimedOut => {
            trail.advance(RunPhase::ClientTimeout);
            warn!(
                "Experiment failed! {}: client did not exit within {}s",
                trail.name, env.client_timeout_secs
            );
            client.kill();
            ExperimentOutcome::ClientTimedOut
        }
    };

    trail.advance(RunPhase::Terminating);
    server.kill();
    proxy.kill();

    for handle in [&mut server, &mut proxy] {
        let output = handle.drain(grace);
        if output.is_empty() {
            debug!("{}: {} produced no output", trail.name, handle.role());
            continue;
        }
        logs.push(persist_log(log_directory, handle.role(), &output)?);
    }
    trail.advance(RunPhase::Logged);

    Ok(Supervised {
        outcome,
        logs,
        processes: vec![summarize(&server), summarize(&proxy), summarize(&client)],
    })
}

/// Reset, render and supervise one configuration.
pub fn run_experiment(config: ExperimentConfig, env: &HarnessEnv) -> Result<ExperimentReport> {
    let name = config.log_dir_name();
    let mut trail = PhaseTrail::new(&name);

    reset_environment(env)?;
    trail.advance(RunPhase::Reset);

    let rendered = render_experiment(config, env)?;
    trail.advance(RunPhase::Rendered);

    let mut state = RunStateGuard::start(&rendered)?;
    let supervised = supervise(&rendered, env, &mut trail)?;
    state.complete(&supervised.outcome)?;
    trail.advance(RunPhase::Done);

    Ok(ExperimentReport {
        name,
        log_directory: rendered.log_directory().to_path_buf(),
        outcome: supervised.outcome,
        logs: supervised.logs,
        processes: supervised.processes,
        phases: trail.phases,
    })
}
