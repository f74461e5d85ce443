//! Per-test session: the processes and files one test run owns.
//!
//! Everything a test starts or writes is registered here before use and
//! released exactly once. [`Session::teardown`] is the graceful path; dropping
//! an un-torn-down session still kills its children and removes its files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;
use vigil_core::{FileLedger, HarnessError, Result};
use vigil_platform::{LaunchSpec, ProcessRole, Readiness, SupervisedProcess};

/// Resources owned by one test run.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    port: u16,
    stop_grace: Duration,
    // Declared before the ledger so children die before their files go.
    processes: Vec<SupervisedProcess>,
    ledger: FileLedger,
    torn_down: bool,
}

impl Session {
    /// Creates an empty session for a run namespaced by `port`.
    #[must_use]
    pub fn new(port: u16, stop_grace: Duration) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, port, "session opened");
        Self {
            id,
            port,
            stop_grace,
            processes: Vec::new(),
            ledger: FileLedger::new(),
            torn_down: false,
        }
    }

    /// Session id, for log correlation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Port namespacing this run.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Registers a file for removal at teardown.
    pub fn track_file(&mut self, path: impl Into<PathBuf>) {
        self.ledger.register(path);
    }

    /// Returns true if `path` is tracked.
    #[must_use]
    pub fn tracks(&self, path: &Path) -> bool {
        self.ledger.contains(path)
    }

    /// The tracked-file set.
    #[must_use]
    pub const fn files(&self) -> &FileLedger {
        &self.ledger
    }

    /// Mutable access to the tracked-file set, for synthesizers that register
    /// what they write.
    pub fn files_mut(&mut self) -> &mut FileLedger {
        &mut self.ledger
    }

    /// Processes started so far, in start order.
    #[must_use]
    pub fn processes(&self) -> &[SupervisedProcess] {
        &self.processes
    }

    /// First process with `role`, if one was started.
    #[must_use]
    pub fn process(&self, role: ProcessRole) -> Option<&SupervisedProcess> {
        self.processes.iter().find(|p| p.role() == role)
    }

    /// Starts a process and waits for its readiness marker.
    ///
    /// The launch's auxiliary files are tracked before spawning, so they are
    /// cleaned up even if the start fails. A started process is tracked before
    /// its readiness scan.
    ///
    /// # Errors
    ///
    /// Returns a setup error if the session was already torn down, the spawn
    /// fails, the budget elapses, or the process exits before printing its
    /// marker.
    pub async fn launch(&mut self, spec: LaunchSpec, budget: Duration) -> Result<String> {
        if self.torn_down {
            return Err(HarnessError::setup(format!(
                "cannot start {} after session {} was torn down",
                spec.role, self.id
            )));
        }
        for file in &spec.aux_files {
            self.ledger.register(file.clone());
        }
        let role = spec.role;
        let marker = spec.readiness_marker.clone();

        let process = SupervisedProcess::spawn(spec)?;
        self.processes.push(process);
        let Some(process) = self.processes.last_mut() else {
            return Err(HarnessError::setup(format!("{role} was not tracked")));
        };

        match process.wait_ready(budget).await? {
            Readiness::Ready { line } => Ok(line),
            Readiness::Exited { status } => Err(HarnessError::setup(format!(
                "{role} exited with {status} before printing {marker:?}"
            ))),
        }
    }

    /// Stops every process, newest first, then removes every tracked file.
    ///
    /// Every release is attempted even when an earlier one fails. Already
    /// exited processes and already missing files are not failures. Calling
    /// this again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Teardown`] listing every release that failed.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let mut failures = Vec::new();
        for process in self.processes.iter_mut().rev() {
            if let Err(e) = process.stop(self.stop_grace).await {
                tracing::warn!(session = %self.id, role = %process.role(), error = %e, "failed to stop process");
                failures.push(format!("{}: {e}", process.role()));
            }
        }

        for failure in self.ledger.clear() {
            tracing::warn!(
                session = %self.id,
                path = %failure.path.display(),
                error = %failure.error,
                "failed to remove tracked file"
            );
            failures.push(format!("{}: {}", failure.path.display(), failure.error));
        }

        tracing::info!(session = %self.id, processes = self.processes.len(), "session torn down");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::teardown(failures.join("; ")))
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.torn_down {
            tracing::debug!(
                session = %self.id,
                processes = self.processes.len(),
                files = self.ledger.len(),
                "session dropped without teardown, killing children"
            );
        }
    }
}
