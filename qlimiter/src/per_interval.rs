use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::error;
use tracing::trace;

use super::CallId;
use super::Limit;
use super::Notifier;
use super::Release;
use super::Timer;
use super::Unblock;
use super::interval::TIMER_MARGIN;

#[derive(Debug, Default)]
struct Slots {
    running: usize,
    // deadlines of completed calls still holding a slot, oldest first
    expiries: VecDeque<Instant>,
}

struct Window {
    max: usize,
    interval: Duration,
    slots: Mutex<Slots>,
    notifier: Notifier,
    timer: Timer,
}

/// Admits at most `max` calls per trailing window.
///
/// A slot is taken on admission and held until `interval` after the call
/// completes, so each call's window starts at its own completion rather than at
/// a shared epoch. Pending expiries share one timer armed for the earliest
/// deadline.
pub struct LimitPerInterval {
    window: Arc<Window>,
}

impl LimitPerInterval {
    /// Creates a new `LimitPerInterval` policy.
    ///
    /// # Arguments
    ///
    /// * `max` - The maximum number of calls counted within one window.
    /// * `interval` - How long a completed call keeps its slot.
    pub fn new(max: NonZeroUsize, interval: Duration) -> Self {
        let window = Arc::new_cyclic(|weak: &Weak<Window>| {
            let weak = weak.clone();
            Window {
                max: max.get(),
                interval,
                slots: Mutex::new(Slots::default()),
                notifier: Notifier::default(),
                timer: Timer::new(move || {
                    if let Some(window) = weak.upgrade() {
                        window.expire();
                    }
                }),
            }
        });
        Self { window }
    }

    pub fn max(&self) -> usize {
        self.window.max
    }

    pub fn interval(&self) -> Duration {
        self.window.interval
    }

    /// Calls admitted whose slot has not yet expired.
    pub fn running(&self) -> usize {
        self.window.slots.lock().running
    }
}

impl Window {
    fn arm(&self, delay: Duration) {
        if let Err(err) = self.timer.start(delay) {
            error!(%err, ?delay, "could not schedule window expiry");
        }
    }

    fn expire(&self) {
        let now = Instant::now();
        let (expired, next) = {
            let mut slots = self.slots.lock();
            let mut expired = 0;
            while slots.expiries.front().is_some_and(|deadline| *deadline <= now) {
                slots.expiries.pop_front();
                slots.running = slots.running.saturating_sub(1);
                expired += 1;
            }
            (expired, slots.expiries.front().copied())
        };

        if let Some(next) = next {
            self.arm(next.saturating_duration_since(now));
        }
        trace!(expired, "window slots expired");
        for _ in 0..expired {
            self.notifier.fire(None);
        }
    }
}

impl Limit for LimitPerInterval {
    fn set_on_unblock(&self, notifier: Unblock) {
        self.window.notifier.set(notifier);
    }

    fn acquire(&self, _call: CallId) -> bool {
        let mut slots = self.window.slots.lock();
        if slots.running < self.window.max {
            slots.running += 1;
            true
        } else {
            false
        }
    }

    fn release(&self, _call: CallId, release: Release) {
        let delay = self.window.interval + TIMER_MARGIN;
        let first = {
            let mut slots = self.window.slots.lock();
            match release {
                Release::Undo => {
                    slots.running = slots.running.saturating_sub(1);
                    return;
                }
                Release::Completed => {
                    slots.expiries.push_back(Instant::now() + delay);
                    slots.expiries.len() == 1
                }
            }
        };

        if first {
            self.window.arm(delay);
        }
    }
}

impl fmt::Debug for LimitPerInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.window.slots.lock();
        f.debug_struct("LimitPerInterval")
            .field("max", &self.window.max)
            .field("interval", &self.window.interval)
            .field("running", &slots.running)
            .field("pending_expiries", &slots.expiries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    fn watched(max: usize, interval: Duration) -> (LimitPerInterval, Arc<AtomicUsize>) {
        let rl = LimitPerInterval::new(NonZeroUsize::new(max).unwrap(), interval);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        rl.set_on_unblock(Arc::new(move |_: Option<NonZeroUsize>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (rl, fired)
    }

    #[test]
    fn it_enforces_limits() {
        let rl = LimitPerInterval::new(NonZeroUsize::new(2).unwrap(), Duration::from_millis(10));

        assert!(rl.acquire(CallId::next()));
        assert!(rl.acquire(CallId::next()));
        assert!(!rl.acquire(CallId::next()));
        assert_eq!(rl.running(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_unblocks_an_interval_after_release() {
        let (rl, fired) = watched(2, Duration::from_millis(10));

        let call = CallId::next();
        assert!(rl.acquire(call));
        assert!(rl.acquire(CallId::next()));
        rl.release(call, Release::Completed);

        // the slot is still held until the window passes
        assert_eq!(rl.running(), 2);
        assert!(!rl.acquire(CallId::next()));

        tokio::time::sleep(Duration::from_millis(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(rl.running(), 1);
        assert!(rl.acquire(CallId::next()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_frees_slot_immediately() {
        let (rl, fired) = watched(1, Duration::from_millis(10));

        let call = CallId::next();
        assert!(rl.acquire(call));
        rl.release(call, Release::Undo);

        assert_eq!(rl.running(), 0);
        assert!(rl.acquire(CallId::next()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_release_expires_on_its_own_schedule() {
        let (rl, fired) = watched(3, Duration::from_millis(10));

        let calls: Vec<CallId> = (0..3).map(|_| CallId::next()).collect();
        for call in &calls {
            assert!(rl.acquire(*call));
        }

        rl.release(calls[0], Release::Completed);
        tokio::time::sleep(Duration::from_millis(4)).await;
        rl.release(calls[1], Release::Completed);
        rl.release(calls[2], Release::Completed);

        tokio::time::sleep(Duration::from_millis(8)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(rl.running(), 2);

        tokio::time::sleep(Duration::from_millis(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(rl.running(), 0);
    }

    #[test]
    fn test_debug_reports_configuration() {
        let rl = LimitPerInterval::new(NonZeroUsize::new(2).unwrap(), Duration::from_secs(1));
        let debug = format!("{rl:?}");

        assert!(debug.starts_with("LimitPerInterval { max: 2, interval: 1s"));
    }
}
