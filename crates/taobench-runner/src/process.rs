//! Scoped handles over the external server, proxy and client processes.
//!
//! A handle owns its child for the whole experiment. Output of both stdout and stderr
//! is collected by reader threads into one buffer, so it survives a forced kill. A handle
//! dropped while its process is alive kills the process group first.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{HarnessError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Proxy,
    Client,
}

impl Role {
    /// Start order of one experiment.
    pub const START_ORDER: [Role; 3] = [Role::Server, Role::Proxy, Role::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Proxy => "proxy",
            Role::Client => "client",
        }
    }

    pub fn log_file_name(&self) -> &'static str {
        match self {
            Role::Server => "server.log",
            Role::Proxy => "proxy.log",
            Role::Client => "client.log",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Started,
    Awaiting,
    Completed,
    TimedOut,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
}

pub struct ProcessHandle {
    role: Role,
    command_line: String,
    child: Child,
    state: ProcessState,
    exit_status: Option<ExitStatus>,
    output: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
}

fn read_stream<T: Read>(mut stream: T, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buffer = [0; 4096];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
                out.extend_from_slice(&buffer[..n]);
            }
            Err(_) => break,
        }
    }
}

fn launch_reader<T>(stream: T, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    T: Read + Send + 'static,
{
    thread::spawn(move || read_stream(stream, sink))
}

impl ProcessHandle {
    /// Starts `argv` in `cwd` with no stdin, in a fresh process group on unix.
    pub fn spawn(role: Role, argv: &[String], cwd: &Path) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or(HarnessError::EmptyCommand(role.as_str()))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            role: role.to_string(),
            source,
        })?;

        let output = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(launch_reader(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(launch_reader(stderr, Arc::clone(&output)));
        }

        Ok(Self {
            role,
            command_line: argv.join(" "),
            child,
            state: ProcessState::Started,
            exit_status: None,
            output,
            readers,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    fn is_running(&self) -> bool {
        self.exit_status.is_none()
    }

    /// Polls for exit until `timeout` elapses. The process keeps running on timeout.
    /// A timeout too large to represent as an instant never expires.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        self.state = ProcessState::Awaiting;
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.exit_status = Some(status);
                self.state = ProcessState::Completed;
                return Ok(WaitOutcome::Exited(status));
            }
            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    self.state = ProcessState::TimedOut;
                    return Ok(WaitOutcome::TimedOut);
                }
                Some(deadline) => POLL_INTERVAL.min(deadline - now),
                None => POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
    }

    #[cfg(unix)]
    fn signal_group(&self) {
        let pgid = self.child.id() as libc::pid_t;
        // ESRCH just means the whole group is already gone.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self) {}

    /// Forcefully terminates the process (and its group) and reaps it. Never blocks on a
    /// polite shutdown.
    pub fn kill(&mut self) {
        if self.is_running() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_status = Some(status);
                if self.state != ProcessState::TimedOut {
                    self.state = ProcessState::Completed;
                }
            }
        }
        self.signal_group();
        if self.is_running() {
            let _ = self.child.kill();
            match self.child.wait() {
                Ok(status) => self.exit_status = Some(status),
                Err(err) => debug!("{} (pid {}) not reaped: {}", self.role, self.pid(), err),
            }
            self.state = ProcessState::Killed;
        }
    }

    /// Takes everything captured so far. Waits at most `grace` for the reader threads to
    /// reach end of stream; a reader still blocked after that is left detached.
    pub fn drain(&mut self, grace: Duration) -> Vec<u8> {
        let deadline = Instant::now().checked_add(grace);
        while self.readers.iter().any(|r| !r.is_finished())
            && deadline.map_or(true, |deadline| Instant::now() < deadline)
        {
            thread::sleep(Duration::from_millis(10));
        }
        for reader in std::mem::take(&mut self.readers) {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }
        let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *out)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            debug!("{} (pid {}) still running at drop, killing", self.role, self.pid());
            self.kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn pid_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[test]
    fn completed_process_output_includes_stderr() {
        let cwd = std::env::temp_dir();
        let mut handle = ProcessHandle::spawn(Role::Client, &sh("echo hello; echo oops >&2"), &cwd)
            .expect("spawn");
        assert_eq!(handle.state(), ProcessState::Started);
        match handle.wait_timeout(Duration::from_secs(10)).expect("wait") {
            WaitOutcome::Exited(status) => assert!(status.success()),
            WaitOutcome::TimedOut => panic!("echo should not time out"),
        }
        assert!(handle.exit_status().is_some_and(|s| s.success()));
        assert_eq!(handle.state(), ProcessState::Completed);
        let out = String::from_utf8(handle.drain(Duration::from_secs(2))).expect("utf8");
        assert!(out.contains("hello") && out.contains("oops"), "got {:?}", out);
        handle.kill();
        assert_eq!(handle.state(), ProcessState::Completed);
    }

    #[test]
    fn unrepresentable_timeout_waits_for_exit() {
        let cwd = std::env::temp_dir();
        let mut handle =
            ProcessHandle::spawn(Role::Client, &sh("sleep 0.2; echo late"), &cwd).expect("spawn");
        let outcome = handle
            .wait_timeout(Duration::from_secs(u64::MAX))
            .expect("wait");
        assert!(matches!(outcome, WaitOutcome::Exited(status) if status.success()));
        let out = handle.drain(Duration::MAX);
        assert_eq!(String::from_utf8_lossy(&out), "late\n");
    }

    #[test]
    fn timed_out_process_is_killed_and_keeps_partial_output() {
        let cwd = std::env::temp_dir();
        let mut handle = ProcessHandle::spawn(Role::Server, &sh("echo started; exec sleep 30"), &cwd)
            .expect("spawn");
        let pid = handle.pid();
        assert_eq!(
            handle.wait_timeout(Duration::from_millis(500)).expect("wait"),
            WaitOutcome::TimedOut
        );
        assert_eq!(handle.state(), ProcessState::TimedOut);
        handle.kill();
        assert_eq!(handle.state(), ProcessState::Killed);
        assert!(!pid_alive(pid));
        let out = String::from_utf8(handle.drain(Duration::from_secs(2))).expect("utf8");
        assert_eq!(out, "started\n");
    }

    #[test]
    fn kill_reaches_background_children_so_drain_is_prompt() {
        let cwd = std::env::temp_dir();
        let mut handle = ProcessHandle::spawn(Role::Proxy, &sh("sleep 30 & echo bg; wait"), &cwd)
            .expect("spawn");
        thread::sleep(Duration::from_millis(300));
        handle.kill();
        let started = Instant::now();
        let out = handle.drain(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(4), "drain waited on an orphan");
        assert_eq!(String::from_utf8_lossy(&out), "bg\n");
    }

    #[test]
    fn dropping_a_running_handle_kills_it() {
        let cwd = std::env::temp_dir();
        let handle = ProcessHandle::spawn(Role::Server, &sh("exec sleep 30"), &cwd).expect("spawn");
        let pid = handle.pid();
        assert!(pid_alive(pid));
        drop(handle);
        assert!(!pid_alive(pid));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let cwd = std::env::temp_dir();
        let argv = vec!["/nonexistent/taobench-launcher".to_string()];
        let err = ProcessHandle::spawn(Role::Client, &argv, &cwd)
            .err()
            .expect("spawn must fail");
        assert!(matches!(err, HarnessError::Spawn { ref role, .. } if role == "client"));
        assert!(matches!(
            ProcessHandle::spawn(Role::Client, &[], &cwd).err(),
            Some(HarnessError::EmptyCommand("client"))
        ));
    }
}
