//! Ephemeral port selection.

use std::net::TcpListener;

use vigil_core::{HarnessError, Result};

/// Picks a free localhost port by binding port 0 and releasing the listener.
///
/// The port namespaces both the mock's listening address and the file names
/// of one test run, so concurrently running tests do not collide.
pub fn ephemeral_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| HarnessError::setup(format!("failed to reserve a port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| HarnessError::setup(format!("failed to read reserved port: {e}")))?
        .port();
    Ok(port)
}
