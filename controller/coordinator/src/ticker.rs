use mesh_sync_core::{Bus, Message};
use std::time::Duration;
use tokio::time;

/// The shortest interval at which periodic resyncs may be requested.
pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
#[error("resync interval of {0:?} is shorter than the 60s minimum")]
pub struct InvalidResyncInterval(pub Duration);

/// Periodically requests that every proxy be refreshed.
#[derive(Clone, Debug)]
pub struct Resync {
    interval: Option<Duration>,
}

impl Resync {
    /// A zero interval disables periodic resyncs.
    pub fn new(interval: Duration) -> Result<Self, InvalidResyncInterval> {
        if interval.is_zero() {
            return Ok(Self::disabled());
        }
        if interval < MIN_RESYNC_INTERVAL {
            return Err(InvalidResyncInterval(interval));
        }
        Ok(Self {
            interval: Some(interval),
        })
    }

    pub fn disabled() -> Self {
        Self { interval: None }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Publishes a broadcast request on every tick. Returns immediately when disabled.
    pub async fn run(self, bus: Bus) {
        let Some(interval) = self.interval else {
            tracing::debug!("Periodic resync disabled");
            return;
        };

        let mut ticks = time::interval_at(time::Instant::now() + interval, interval);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            tracing::debug!(?interval, "Requesting resync");
            bus.publish(Message::schedule_proxy_broadcast());
        }
    }
}
