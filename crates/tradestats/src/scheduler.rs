use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct TickerSpec {
    pub name: String,
    pub interval: Duration,
    pub run_immediately: bool,
}

/// Spawns a ticker that sends `()` every `interval`. Ticks missed while
/// the consumer is busy are skipped; the task ends when the receiver drops.
pub fn start(spec: TickerSpec) -> (mpsc::Receiver<()>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        let start_at = if spec.run_immediately {
            Instant::now()
        } else {
            Instant::now() + spec.interval
        };
        let mut interval = tokio::time::interval_at(start_at, spec.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            tracing::debug!(ticker = %spec.name, "tick");
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    (rx, handle)
}
