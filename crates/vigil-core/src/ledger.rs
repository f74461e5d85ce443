//! Tracked-file set.
//!
//! Every file the harness causes to exist is registered here before it is
//! used, and removed exactly once when the ledger is cleared. Dropping a
//! ledger that still holds entries removes them best-effort.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Files owned by one test session.
#[derive(Debug, Default)]
pub struct FileLedger {
    files: Vec<PathBuf>,
}

/// A file that could not be removed during cleanup.
#[derive(Debug)]
pub struct RemovalFailure {
    /// The file that was left behind.
    pub path: PathBuf,
    /// Why removal failed.
    pub error: std::io::Error,
}

impl FileLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Registers a path. Registering the same path twice is a no-op.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            tracing::debug!(path = %path.display(), "tracking file");
            self.files.push(path);
        }
    }

    /// Returns true if the path is tracked.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|p| p == path)
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Tracked paths in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    /// Removes every tracked file and empties the ledger.
    ///
    /// Files that are already gone count as removed. Any other failure is
    /// reported back; the ledger is empty afterwards either way.
    pub fn clear(&mut self) -> Vec<RemovalFailure> {
        let mut failures = Vec::new();
        for path in self.files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed tracked file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "tracked file already absent");
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "failed to remove tracked file");
                    failures.push(RemovalFailure { path, error });
                }
            }
        }
        failures
    }
}

impl Drop for FileLedger {
    fn drop(&mut self) {
        if !self.files.is_empty() {
            let _ = self.clear();
        }
    }
}
