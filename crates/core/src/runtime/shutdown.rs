use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Owns the pipeline's cancellation token and cancels it on SIGTERM.
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    token: CancellationToken,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Listen for SIGTERM (Ctrl+C off unix) in the background.
    /// The listener exits quietly once the token is cancelled some other way.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                received = terminate() => {
                    if received {
                        tracing::info!("termination signal received, shutting down");
                        token.cancel();
                    }
                }
            }
        });
    }
}

#[cfg(unix)]
async fn terminate() -> bool {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => sigterm.recv().await.is_some(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<bool>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() -> bool {
    signal::ctrl_c().await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_share_cancellation() {
        let guard = ShutdownGuard::new();
        let a = guard.token();
        let b = guard.token();
        guard.spawn_signal_listener();
        a.cancel();
        assert!(b.is_cancelled());
    }
}
