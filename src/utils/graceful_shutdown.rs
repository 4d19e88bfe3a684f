use eyre::{Result, WrapErr};
use tokio::{signal, sync::watch};

/// Why the process is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Requested,
}

/// Fans a single shutdown event out to every waiter.
///
/// The first trigger wins; later triggers are ignored. Waiters that subscribe
/// after the trigger still observe it.
pub struct GracefulShutdown {
    reason: watch::Sender<Option<ShutdownReason>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self { reason }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.borrow().is_some()
    }

    /// Trigger shutdown. Returns `false` if it had already been triggered.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        let triggered = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if triggered {
            tracing::info!("Shutdown triggered: {:?}", reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
        triggered
    }

    /// Listen for SIGINT and SIGTERM and trigger shutdown on the first one.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        #[cfg(unix)]
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to register SIGTERM handler")?;

        #[cfg(unix)]
        let terminate = async move {
            sigterm.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = signal::ctrl_c() => {
                res.wrap_err("Failed to listen for Ctrl+C")?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
        }
        Ok(())
    }

    /// Wait until shutdown is triggered.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.reason.subscribe();
        match receiver.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            // The sender lives in `self`, so this only happens mid-drop.
            Err(_) => ShutdownReason::Requested,
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());

        assert!(shutdown.trigger_shutdown(ShutdownReason::Terminate));
        assert!(!shutdown.trigger_shutdown(ShutdownReason::Interrupt));
        assert!(shutdown.is_shutdown_initiated());
        assert_eq!(
            shutdown.wait_for_shutdown_signal().await,
            ShutdownReason::Terminate
        );
    }

    #[tokio::test]
    async fn test_waiters_are_released() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.wait_for_shutdown_signal().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger_shutdown(ShutdownReason::Requested);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
    }
}
