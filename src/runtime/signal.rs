//! # OS shutdown signals.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT` and Ctrl-C.
//! **Elsewhere:** Ctrl-C via [`tokio::signal::ctrl_c`].

use crate::error::RuntimeError;

/// Completes when the process receives a termination signal.
///
/// Each call registers its own listeners.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> Result<(), RuntimeError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).map_err(RuntimeError::Signal)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(RuntimeError::Signal)?;
    let mut sigquit = signal(SignalKind::quit()).map_err(RuntimeError::Signal)?;

    let which = tokio::select! {
        res = tokio::signal::ctrl_c() => { res.map_err(RuntimeError::Signal)?; "ctrl-c" }
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    tracing::info!(signal = which, "shutdown signal received");
    Ok(())
}

/// Completes when the process receives Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> Result<(), RuntimeError> {
    tokio::signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
    tracing::info!(signal = "ctrl-c", "shutdown signal received");
    Ok(())
}
