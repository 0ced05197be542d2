//! Interrupt handling
//!
//! Ctrl-C (or SIGTERM) raises the run's [`AbortSignal`]. Operations already in
//! flight finish; nothing new starts and nothing is rolled back.

use fleetwire_core::AbortSignal;
use tokio::task::JoinHandle;

/// Raise `abort` on the first interrupt
pub fn install_interrupt_handler(abort: AbortSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C)"),
            _ = terminate => tracing::info!("Received SIGTERM"),
        }

        abort.raise();
    })
}
