//! # OS termination signals.
//!
//! Unix: `SIGINT`, `SIGTERM`, `SIGQUIT` (plus Ctrl-C). Elsewhere: Ctrl-C only.

/// Which signal ended the wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ShutdownSignal {
    Interrupt,
    Terminate,
    Quit,
}

impl ShutdownSignal {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "interrupt",
            ShutdownSignal::Terminate => "terminate",
            ShutdownSignal::Quit => "quit",
        }
    }
}

/// Resolves on the first termination signal; never resolves if handlers cannot be installed.
pub(crate) async fn wait_for_shutdown_signal() -> ShutdownSignal {
    match listen().await {
        Ok(signal) => signal,
        Err(e) => {
            tracing::warn!(error = %e, "signal handlers unavailable; relying on explicit shutdown");
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn listen() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        _ = sigint.recv() => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sigquit.recv() => ShutdownSignal::Quit,
    };
    Ok(received)
}

#[cfg(not(unix))]
async fn listen() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}
