//! Midnight rebuild scheduling.
//!
//! Each midnight is armed as its own one-shot sleep and the delay is
//! recomputed after every firing. A fixed 24h interval would drift by an hour
//! across every DST change.

use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::time::Duration;

/// Wall-clock source, swappable in tests.
pub type Clock = fn() -> DateTime<Utc>;

/// Re-invokes a rebuild at every midnight of the reference timezone.
pub struct MidnightScheduler {
    tz: Tz,
    floor: Duration,
    clock: Clock,
}

impl MidnightScheduler {
    pub fn new(tz: Tz, floor: Duration) -> Self {
        Self {
            tz,
            floor,
            clock: Utc::now,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Delay from `now` until the next midnight, never shorter than the floor.
    pub fn delay_until_midnight(&self, now: DateTime<Utc>) -> Duration {
        let until = next_midnight(now, self.tz)
            .with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        until.max(self.floor)
    }

    /// Sleep until each midnight and run `on_midnight`, forever.
    pub async fn run<F, Fut>(self, mut on_midnight: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let delay = self.delay_until_midnight((self.clock)());
            tracing::info!("Next playlist rebuild in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;

            tracing::info!("Midnight reached, rebuilding playlist");
            on_midnight().await;
        }
    }
}

/// First instant of the day after `now`'s local date in `tz`.
///
/// Midnight can be skipped by a DST jump in some zones; the first local hour
/// that exists is used instead. An ambiguous midnight resolves to the earlier
/// instant.
fn next_midnight(now: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);

    for hour in 0..3 {
        let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
            continue;
        };
        if let Some(instant) = tz.from_local_datetime(&tomorrow.and_time(time)).earliest() {
            return instant;
        }
    }

    // No zone skips three hours; fall back to a plain day from now.
    (now + ChronoDuration::days(1)).with_timezone(&tz)
}
