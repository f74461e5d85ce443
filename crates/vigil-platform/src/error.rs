//! Platform error types.

use std::time::Duration;

use vigil_core::HarnessError;

/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Process supervision errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Spawn failed.
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Why.
        reason: String,
    },

    /// The readiness marker did not appear within the budget.
    #[error("{role} did not print {marker:?} within {budget:?}")]
    ReadinessTimeout {
        /// Role of the process that was being waited on.
        role: String,
        /// Marker that was expected.
        marker: String,
        /// Budget that elapsed.
        budget: Duration,
    },

    /// The readiness scan was already performed for this process.
    #[error("readiness of {0} was already scanned")]
    AlreadyScanned(String),

    /// Signal failed for a reason other than the process being gone.
    #[error("failed to send signal: {0}")]
    Signal(String),

    /// Waiting on the child failed.
    #[error("failed to wait for process: {0}")]
    Wait(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    /// Creates a signal error.
    #[must_use]
    pub fn signal(msg: impl Into<String>) -> Self {
        Self::Signal(msg.into())
    }

    /// Creates a wait error.
    #[must_use]
    pub fn wait(msg: impl Into<String>) -> Self {
        Self::Wait(msg.into())
    }
}

impl From<PlatformError> for HarnessError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Io(e) => Self::Io(e),
            e @ (PlatformError::Signal(_) | PlatformError::Wait(_)) => Self::teardown(e.to_string()),
            e => Self::setup(e.to_string()),
        }
    }
}
