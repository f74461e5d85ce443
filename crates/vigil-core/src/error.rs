//! Error types for vigil.
//!
//! Every failure surfaces as a test failure with a human-readable message that
//! carries the relevant expected/actual values. Nothing here is retried except
//! through the convergence poller.

use std::time::Duration;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Failure taxonomy shared by every vigil crate.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Config synthesis or process launch failed.
    #[error("setup error: {0}")]
    Setup(String),

    /// A mock call answered with a status other than the one the endpoint documents.
    #[error("unexpected status from {operation}: expected {expected}, got {actual}")]
    UnexpectedStatus {
        /// The mock operation that was called.
        operation: String,
        /// Status the endpoint documents for success.
        expected: u16,
        /// Status actually returned.
        actual: u16,
    },

    /// The convergence poller ran out of time.
    #[error("{description} did not converge within {timeout:?}: expected {expected}, got {observed}")]
    ConvergenceTimeout {
        /// What was being waited for.
        description: String,
        /// Expected value or state, rendered for display.
        expected: String,
        /// Last observed value or state, rendered for display.
        observed: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// More nodes were requested for deletion than exist.
    #[error("cannot delete more nodes than exist: requested {requested}, available {available}")]
    OverDelete {
        /// Number of nodes the caller asked to delete.
        requested: usize,
        /// Number of matching nodes present.
        available: usize,
    },

    /// The HTTP transport failed before a status was received, or the body could not be decoded.
    #[error("transport error: {0}")]
    Transport(String),

    /// Harness settings could not be loaded or are invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// One or more resources could not be released.
    #[error("teardown error: {0}")]
    Teardown(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates a setup error.
    #[must_use]
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a teardown error.
    #[must_use]
    pub fn teardown(msg: impl Into<String>) -> Self {
        Self::Teardown(msg.into())
    }

    /// Returns true if the failure happened while preparing the test.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_) | Self::Config(_))
    }

    /// Returns true if the poller gave up waiting.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ConvergenceTimeout { .. })
    }
}
