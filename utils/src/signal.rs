//! Process termination signals.

/// Wait until the process is asked to terminate.
///
/// Resolves on ctrl-c (SIGINT) everywhere, and additionally on SIGTERM on
/// unix. Returns the name of whichever fired, for logging. If the SIGTERM
/// handler cannot be installed, falls back to watching ctrl-c alone.
pub async fn termination() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "no SIGTERM handler, watching ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return "SIGINT";
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}
