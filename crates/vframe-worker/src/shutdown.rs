//! Shutdown signalling shared by the long-running loops.

use tokio::sync::watch;
use tracing::info;

/// Resolve once shutdown was requested or the sender is gone.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Whether shutdown was requested.
pub fn is_shutdown(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Wait for Ctrl-C or, on Unix, SIGTERM.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_on_request() {
        let (tx, mut rx) = watch::channel(false);
        assert!(!is_shutdown(&rx));
        tx.send(true).unwrap();
        wait_for_shutdown(&mut rx).await;
        assert!(is_shutdown(&rx));
    }

    #[tokio::test]
    async fn test_wait_resolves_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        wait_for_shutdown(&mut rx).await;
    }
}
