use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use super::CallId;
use super::Limit;
use super::Notifier;
use super::Release;
use super::Unblock;

/// Caps the number of calls in flight at once.
///
/// Acquire and release are symmetric, so rolling back an admission is the same
/// decrement as finishing a call. Only a finished call notifies.
pub struct LimitConcurrent {
    max: usize,
    running: AtomicUsize,
    notifier: Notifier,
}

impl LimitConcurrent {
    /// Creates a new `LimitConcurrent` policy.
    ///
    /// # Arguments
    ///
    /// * `max` - The maximum number of calls allowed to run simultaneously.
    pub fn new(max: NonZeroUsize) -> Self {
        Self {
            max: max.get(),
            running: AtomicUsize::new(0),
            notifier: Notifier::default(),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    fn decrement(&self) -> usize {
        match self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |val| val.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }
}

impl Limit for LimitConcurrent {
    fn set_on_unblock(&self, notifier: Unblock) {
        self.notifier.set(notifier);
    }

    fn acquire(&self, _call: CallId) -> bool {
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |val| {
                if val < self.max { Some(val + 1) } else { None }
            })
            .is_ok()
    }

    fn release(&self, _call: CallId, release: Release) {
        let running = self.decrement();
        if release == Release::Completed && running < self.max {
            self.notifier.fire(None);
        }
    }
}

impl fmt::Debug for LimitConcurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitConcurrent")
            .field("max", &self.max)
            .field("running", &self.running())
            .finish()
    }
}
