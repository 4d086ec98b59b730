use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::error;

use super::CallId;
use super::Limit;
use super::Notifier;
use super::Release;
use super::Timer;
use super::Unblock;

/// Margin added to every scheduled unblock so a wakeup can never be observed
/// before the threshold it waits for.
pub(crate) const TIMER_MARGIN: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct Spacing {
    last_at: Option<Instant>,
    next_at: Option<Instant>,
}

/// Enforces a minimum spacing between successive call starts.
///
/// Admitting a call moves the threshold to `now + interval`; the previous
/// threshold is remembered so a rolled back admission restores it exactly.
pub struct LimitInterval {
    interval: Duration,
    spacing: Mutex<Spacing>,
    notifier: Arc<Notifier>,
    timer: Timer,
}

impl LimitInterval {
    /// Creates a new `LimitInterval` policy.
    ///
    /// # Arguments
    ///
    /// * `interval` - The minimum time between two admitted calls.
    pub fn new(interval: Duration) -> Self {
        let notifier = Arc::new(Notifier::default());
        let fire = notifier.clone();
        Self {
            interval,
            spacing: Mutex::new(Spacing::default()),
            notifier,
            timer: Timer::new(move || fire.fire(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Limit for LimitInterval {
    fn set_on_unblock(&self, notifier: Unblock) {
        self.notifier.set(notifier);
    }

    fn acquire(&self, _call: CallId) -> bool {
        let now = Instant::now();
        let mut spacing = self.spacing.lock();
        if spacing.next_at.is_some_and(|next_at| now < next_at) {
            return false;
        }
        spacing.last_at = spacing.next_at;
        spacing.next_at = Some(now + self.interval);
        true
    }

    fn release(&self, _call: CallId, release: Release) {
        let next_at = {
            let mut spacing = self.spacing.lock();
            if release == Release::Undo {
                spacing.next_at = spacing.last_at;
                return;
            }
            spacing.next_at
        };

        let now = Instant::now();
        match next_at {
            Some(next_at) if now < next_at => {
                let delay = next_at - now + TIMER_MARGIN;
                if let Err(err) = self.timer.start(delay) {
                    error!(%err, ?delay, "could not schedule interval unblock");
                }
            }
            _ => self.notifier.fire(None),
        }
    }
}

impl fmt::Debug for LimitInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitInterval")
            .field("interval", &self.interval)
            .field("next_at", &self.spacing.lock().next_at)
            .finish()
    }
}
