//! The periodic sweep deciding which modems are due for a kick.
//!
//! One timer covers the whole registry. Per-modem deadline timers would be
//! marginally more precise but the sweep keeps the scheduling model to a
//! single recurring tick and naturally picks up modems added between ticks.

use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};

use crate::supervisor::Event;

/// Verdict of one sweep over one modem.
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Modem is registered (or registering); nothing to do.
    NotIdle,
    /// Modem is idle/denied but has not yet crossed the threshold; the
    /// duration is the remaining wait.
    Wait(Duration),
    /// Modem has been idle/denied longer than the threshold; the duration is
    /// how long it has been stuck.
    Kick(Duration),
}

#[must_use]
pub fn evaluate(
    idle_since: Option<Instant>,
    now: Instant,
    threshold: Duration,
) -> Verdict {
    let Some(idle_since) = idle_since else {
        return Verdict::NotIdle;
    };
    let stuck_for = now.saturating_duration_since(idle_since);
    if stuck_for > threshold {
        Verdict::Kick(stuck_for)
    } else {
        Verdict::Wait(threshold - stuck_for)
    }
}

/// Feeds a [`Event::SweepTick`] into the event loop every `period`, starting
/// one period from now. Runs until the event loop goes away.
pub async fn tick_loop(period: Duration, tx: mpsc::UnboundedSender<Event>) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if tx.send(Event::SweepTick).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{evaluate, Verdict};

    const THRESHOLD: Duration = Duration::from_secs(605);

    #[tokio::test(start_paused = true)]
    async fn registered_modem_is_never_due() {
        assert_eq!(evaluate(None, Instant::now(), THRESHOLD), Verdict::NotIdle);
    }

    #[tokio::test(start_paused = true)]
    async fn modem_below_threshold_reports_remaining_wait() {
        let idle_since = Instant::now();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            evaluate(Some(idle_since), Instant::now(), THRESHOLD),
            Verdict::Wait(THRESHOLD - Duration::from_secs(5)),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn modem_exactly_at_threshold_still_waits() {
        let idle_since = Instant::now();
        tokio::time::advance(THRESHOLD).await;
        assert_eq!(
            evaluate(Some(idle_since), Instant::now(), THRESHOLD),
            Verdict::Wait(Duration::ZERO),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn modem_past_threshold_is_due_for_a_kick() {
        let idle_since = Instant::now();
        tokio::time::advance(THRESHOLD + Duration::from_secs(1)).await;
        assert_eq!(
            evaluate(Some(idle_since), Instant::now(), THRESHOLD),
            Verdict::Kick(THRESHOLD + Duration::from_secs(1)),
        );
    }
}
