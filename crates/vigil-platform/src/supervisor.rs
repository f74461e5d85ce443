//! Supervised child processes.
//!
//! A [`SupervisedProcess`] is started with its output piped. [`SupervisedProcess::wait_ready`]
//! scans that output line by line for a readiness marker within a bounded budget;
//! afterwards the output keeps being drained so the child never blocks on a full
//! pipe. [`SupervisedProcess::stop`] sends SIGTERM, waits out a grace period and
//! escalates to SIGKILL.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use vigil_core::{LaunchTemplate, Placeholders};

use crate::error::{PlatformError, Result};

/// Which of the two harness processes this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// The simulated cloud backend.
    MockBackend,
    /// The service being exercised.
    ServiceUnderTest,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MockBackend => write!(f, "mock-backend"),
            Self::ServiceUnderTest => write!(f, "service-under-test"),
        }
    }
}

/// Everything needed to start one supervised process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Role, used in logs and errors.
    pub role: ProcessRole,
    /// Program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Substring that marks the process as ready.
    pub readiness_marker: String,
    /// Scan stderr as well as stdout.
    pub merge_stderr: bool,
    /// Files the process writes that must be removed at teardown.
    pub aux_files: Vec<PathBuf>,
    /// Working directory, if not the current one.
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Creates a launch spec with no arguments.
    pub fn new(
        role: ProcessRole,
        program: impl Into<String>,
        readiness_marker: impl Into<String>,
    ) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            readiness_marker: readiness_marker.into(),
            merge_stderr: false,
            aux_files: Vec::new(),
            working_dir: None,
        }
    }

    /// Builds a launch spec from a configured template, substituting placeholders.
    #[must_use]
    pub fn from_template(role: ProcessRole, template: &LaunchTemplate, values: &Placeholders) -> Self {
        Self {
            role,
            program: template.program.clone(),
            args: template.render_args(values),
            readiness_marker: template.readiness_marker.clone(),
            merge_stderr: template.merge_stderr,
            aux_files: Vec::new(),
            working_dir: None,
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets whether stderr is scanned together with stdout.
    #[must_use]
    pub const fn merge_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = merge;
        self
    }

    /// Registers an auxiliary file produced by the process.
    #[must_use]
    pub fn aux_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.aux_files.push(path.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Outcome of a readiness scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The marker appeared on this line.
    Ready {
        /// The full output line that contained the marker.
        line: String,
    },
    /// Output ended and the process exited without printing the marker.
    Exited {
        /// Exit status.
        status: ExitStatus,
    },
}

impl Readiness {
    /// Returns true if the marker was seen.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// A child process under supervision.
///
/// Dropping a process that was never stopped kills it.
#[derive(Debug)]
pub struct SupervisedProcess {
    role: ProcessRole,
    program: String,
    pid: Option<u32>,
    child: Child,
    marker: String,
    lines: Option<mpsc::UnboundedReceiver<String>>,
    aux_files: Vec<PathBuf>,
    stopped: bool,
}

impl SupervisedProcess {
    /// Spawns the process with its output piped.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Spawn`] if the program cannot be started.
    pub fn spawn(spec: LaunchSpec) -> Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| PlatformError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(spec.role, "stdout", stdout, Some(tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            let scan = spec.merge_stderr.then(|| tx.clone());
            tokio::spawn(forward_lines(spec.role, "stderr", stderr, scan));
        }
        drop(tx);

        tracing::info!(
            role = %spec.role,
            program = %spec.program,
            args = ?spec.args,
            pid,
            "spawned process"
        );

        Ok(Self {
            role: spec.role,
            program: spec.program,
            pid,
            child,
            marker: spec.readiness_marker,
            lines: Some(rx),
            aux_files: spec.aux_files,
            stopped: false,
        })
    }

    /// Scans output for the readiness marker.
    ///
    /// Returns [`Readiness::Exited`] if the output ends and the process exits
    /// before the marker shows up. Output lines after the marker are only logged.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::ReadinessTimeout`] if neither happens within
    /// `budget`, and [`PlatformError::AlreadyScanned`] on a second call.
    pub async fn wait_ready(&mut self, budget: Duration) -> Result<Readiness> {
        let Some(mut lines) = self.lines.take() else {
            return Err(PlatformError::AlreadyScanned(self.role.to_string()));
        };
        let marker = self.marker.as_str();
        let child = &mut self.child;

        let scan = async {
            while let Some(line) = lines.recv().await {
                if line.contains(marker) {
                    return Ok(Readiness::Ready { line });
                }
            }
            match child.wait().await {
                Ok(status) => Ok(Readiness::Exited { status }),
                Err(e) => Err(PlatformError::wait(e.to_string())),
            }
        };

        let outcome = match tokio::time::timeout(budget, scan).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PlatformError::ReadinessTimeout {
                role: self.role.to_string(),
                marker: self.marker.clone(),
                budget,
            }),
        };

        match &outcome {
            Ok(Readiness::Ready { line }) => {
                tracing::info!(role = %self.role, pid = self.pid, %line, "process ready");
            }
            Ok(Readiness::Exited { status }) => {
                tracing::warn!(role = %self.role, pid = self.pid, %status, "process exited before ready");
            }
            Err(e) => tracing::warn!(role = %self.role, pid = self.pid, error = %e, "readiness scan failed"),
        }
        outcome
    }

    /// Stops the process: SIGTERM, up to `grace` to exit, then SIGKILL.
    ///
    /// Stopping a process that already exited (or was already stopped) is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if signalling or reaping fails for a reason other than
    /// the process being gone.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        if let Some(status) = self
            .child
            .try_wait()
            .map_err(|e| PlatformError::wait(e.to_string()))?
        {
            tracing::debug!(role = %self.role, pid = self.pid, %status, "process already exited");
            self.stopped = true;
            return Ok(());
        }

        tracing::info!(role = %self.role, pid = self.pid, "stopping process");
        self.terminate()?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(role = %self.role, pid = self.pid, %status, "process stopped");
            }
            Ok(Err(e)) => return Err(PlatformError::wait(e.to_string())),
            Err(_) => {
                tracing::warn!(
                    role = %self.role,
                    pid = self.pid,
                    ?grace,
                    "process ignored SIGTERM, sending SIGKILL"
                );
                self.kill()?;
                let status = self
                    .child
                    .wait()
                    .await
                    .map_err(|e| PlatformError::wait(e.to_string()))?;
                tracing::info!(role = %self.role, pid = self.pid, %status, "process killed");
            }
        }

        self.stopped = true;
        Ok(())
    }

    /// Process ID, if the OS reported one.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Role of this process.
    #[must_use]
    pub const fn role(&self) -> ProcessRole {
        self.role
    }

    /// Program that was started.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Auxiliary files the process writes.
    #[must_use]
    pub fn aux_files(&self) -> &[PathBuf] {
        &self.aux_files
    }

    /// Returns true once [`stop`](Self::stop) has completed.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        match self.pid {
            Some(pid) => send_signal(pid, nix::sys::signal::Signal::SIGTERM),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        self.kill()
    }

    #[cfg(unix)]
    fn kill(&mut self) -> Result<()> {
        match self.pid {
            Some(pid) => send_signal(pid, nix::sys::signal::Signal::SIGKILL),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(PlatformError::signal(e.to_string())),
        }
    }
}

/// Sends `signal` to `pid`. A process that no longer exists is not an error.
#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            tracing::debug!(pid, ?signal, "process already gone");
            Ok(())
        }
        Err(e) => Err(PlatformError::signal(format!("{signal} to {pid}: {e}"))),
    }
}

/// Returns true if a process with this PID exists (zombies included).
#[cfg(unix)]
#[must_use]
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Reads `reader` line by line, logging every line and forwarding it to `scan`
/// while the receiver is still listening.
async fn forward_lines<R>(
    role: ProcessRole,
    stream: &'static str,
    reader: R,
    mut scan: Option<mpsc::UnboundedSender<String>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
                tracing::debug!(role = %role, stream, %line, "output");
                if let Some(tx) = &scan {
                    if tx.send(line).is_err() {
                        scan = None;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(role = %role, stream, error = %e, "output read failed");
                break;
            }
        }
    }
}

/// Removes `path`, treating a missing file as already removed.
///
/// # Errors
///
/// Returns any other I/O error.
pub fn remove_aux_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
