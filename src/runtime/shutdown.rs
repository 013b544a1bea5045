//! # OS termination signals.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT` (and Ctrl-C).
//! **Elsewhere:** Ctrl-C via [`tokio::signal::ctrl_c`].

/// Completes when the process receives a termination signal.
///
/// Returns `Err` if a signal listener cannot be registered.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => tracing::info!(signal = "SIGINT", "termination signal received"),
        _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "termination signal received"),
        _ = sigquit.recv() => tracing::info!(signal = "SIGQUIT", "termination signal received"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = "ctrl_c", "termination signal received");
    Ok(())
}
