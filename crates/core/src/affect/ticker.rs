use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::AffectHandle;

/// Spawn a periodic decay task for collaborators acting as the tick source.
/// Calls `tick` with the measured elapsed time every `period` until cancelled.
pub fn spawn(affect: AffectHandle, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("affect ticker shutting down");
                    return;
                }
                _ = tokio::time::sleep(period) => {}
            }

            if cancel.is_cancelled() {
                return;
            }

            let now = Instant::now();
            affect.tick(now.duration_since(last)).await;
            last = now;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Emotion;

    #[tokio::test(start_paused = true)]
    async fn ticker_decays_over_time() {
        let affect = AffectHandle::new(0.5, 10);
        affect.trigger(Emotion::Fear, 1.0).await;

        let cancel = CancellationToken::new();
        let handle = spawn(affect.clone(), Duration::from_secs(1), cancel.clone());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let fear = affect.reading().intensity(Emotion::Fear);
        let expected = (-0.5_f32 * 3.0).exp();
        assert!((fear - expected).abs() < 1e-3, "fear = {fear}, expected {expected}");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_stops_on_cancel() {
        let affect = AffectHandle::new(0.5, 10);
        affect.trigger(Emotion::Joy, 1.0).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        spawn(affect.clone(), Duration::from_secs(1), cancel).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!((affect.reading().intensity(Emotion::Joy) - 1.0).abs() < f32::EPSILON);
    }
}
