//! Fixed-period background loops.
//!
//! [`run_periodic`] drives a task closure on a `tokio::time::interval`
//! until its [`CancellationToken`] fires. Missed ticks are skipped, never
//! replayed. The first tick can be aligned to the next whole minute so
//! minute-granular work runs just after each minute boundary.

use std::future::Future;
use std::time::Duration;

use chrono::TimeDelta;
use rpaflow_core::types::truncate_to_minute;
use rpaflow_core::Timestamp;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// When the first tick fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Immediate,
    NextMinute,
}

/// Time from `now` until the next whole minute; zero on a boundary.
pub fn delay_to_next_minute(now: Timestamp) -> Duration {
    let floor = truncate_to_minute(now);
    if floor == now {
        return Duration::ZERO;
    }
    (floor + TimeDelta::minutes(1) - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Run `task` every `period` until `cancel` fires.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    alignment: Alignment,
    clock: &dyn Clock,
    cancel: CancellationToken,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let delay = match alignment {
        Alignment::Immediate => Duration::ZERO,
        Alignment::NextMinute => delay_to_next_minute(clock.now()),
    };

    tracing::info!(
        task = name,
        period_secs = period.as_secs(),
        first_tick_in_ms = delay.as_millis() as u64,
        "Periodic task started"
    );

    let mut interval = tokio::time::interval_at(Instant::now() + delay, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(task = name, "Periodic task stopping");
                break;
            }
            _ = interval.tick() => {
                task().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn delay_to_next_minute_boundaries() {
        let on_minute = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert_eq!(delay_to_next_minute(on_minute), Duration::ZERO);

        let mid = on_minute + TimeDelta::milliseconds(42_500);
        assert_eq!(delay_to_next_minute(mid), Duration::from_millis(17_500));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_period_until_cancelled() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&count);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run_periodic("test", Duration::from_secs(30), Alignment::Immediate, &clock, token, || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        // Ticks at 0s, 30s, 60s and 90s.
        tokio::time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_for_minute_boundary() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 45).unwrap());
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&count);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run_periodic("aligned", Duration::from_secs(60), Alignment::NextMinute, &clock, token, || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
