use std::time::Duration;
use tokio::time::{self, Instant};

/// The debounce parameters of the coordinator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Debounce {
    /// How long to wait for further changes after the most recent one.
    pub moving: Duration,

    /// The longest a broadcast may be deferred after the first change of a window.
    pub max: Duration,
}

/// A timer that is either stopped or set to fire at an instant.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Deadline {
    #[default]
    Disarmed,
    ArmedUntil(Instant),
}

// === impl Debounce ===

impl Default for Debounce {
    fn default() -> Self {
        Self {
            moving: Duration::from_secs(3),
            max: Duration::from_secs(15),
        }
    }
}

// === impl Deadline ===

impl Deadline {
    pub fn arm(&mut self, at: Instant) {
        *self = Self::ArmedUntil(at);
    }

    pub fn disarm(&mut self) {
        *self = Self::Disarmed;
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Self::ArmedUntil(_))
    }

    /// Completes when the deadline is reached. Never completes while disarmed.
    pub async fn fired(&self) {
        match *self {
            Self::ArmedUntil(at) => time::sleep_until(at).await,
            Self::Disarmed => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn disarmed_never_fires() {
        let deadline = Deadline::default();
        let mut fired = task::spawn(deadline.fired());
        assert_pending!(fired.poll());
        time::advance(Duration::from_secs(3600)).await;
        assert_pending!(fired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_instant() {
        let mut deadline = Deadline::default();
        deadline.arm(Instant::now() + Duration::from_secs(3));
        assert!(deadline.is_armed());

        let mut fired = task::spawn(deadline.fired());
        assert_pending!(fired.poll());
        time::advance(Duration::from_secs(2)).await;
        assert_pending!(fired.poll());
        time::advance(Duration::from_secs(1)).await;
        assert_ready!(fired.poll());
        drop(fired);

        deadline.disarm();
        assert_eq!(deadline, Deadline::Disarmed);
    }
}
