//! # qlimiter
//!
//! `qlimiter` throttles calls to an asynchronous operation. Callers invoke the
//! wrapped operation freely; a [`Limiter`] admits each call through an ordered
//! set of [`Limit`] policies, queues whatever cannot run yet and releases the
//! queue strictly in arrival order as capacity frees up.
//!
//! ## Key Concepts
//!
//! * **Limit**: one admission policy. Built in are [`LimitConcurrent`] (in-flight
//!   cap), [`LimitInterval`] (minimum spacing between starts) and
//!   [`LimitPerInterval`] (at most N completions counted per trailing window).
//! * **Transactional admission**: a call either holds every limit or none of them.
//!   A denial part way through rolls back the limits already taken.
//! * **Unblock notifications**: a limit tells the limiter when capacity it denied
//!   earlier has become available, and the limiter drains its queue.
//!
//! ## Example
//!
//! ```rust
//! use qlimiter::Limiter;
//! use qlimiter::LimiterOptions;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let options = LimiterOptions::new().with_max_concurrent(2);
//!     let limiter = Limiter::from_async(|n: u64| async move { n * 2 }, &options);
//!
//!     assert_eq!(limiter.call(21).await, Ok(42));
//! }
//! ```

use std::fmt;
use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

mod concurrent;
mod error;
mod interval;
mod limiter;
mod notifier;
mod options;
mod per_interval;
mod queue;
mod timer;


pub use concurrent::LimitConcurrent;
pub use error::LimitError;
pub use interval::LimitInterval;
pub use limiter::Call;
pub use limiter::Completion;
pub use limiter::Limiter;
pub use options::Interval;
pub use options::LimiterOptions;
pub use per_interval::LimitPerInterval;
pub use queue::WaitQueue;
pub use timer::Timer;

use notifier::Notifier;

/// Callback a [`Limit`] uses to report that capacity it denied is available again.
///
/// The argument is an optional hint of how many calls may now be admitted.
/// `None` lets the limiter drain until an admission fails.
pub type Unblock = Arc<dyn Fn(Option<NonZeroUsize>) + Send + Sync>;

/// Identity of one scheduled call.
///
/// Every scheduled call gets a fresh id, even when its arguments are equal to
/// those of another call, so acquire and release can always be paired up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    /// Mints an id no other call in this process has.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a limit is being released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// The call ran and finished. The limit may notify once capacity frees.
    Completed,
    /// A later limit denied the call, so this acquisition is rolled back.
    /// State must return to its pre-acquire value and no notification may fire.
    Undo,
}

/// A single admission policy.
///
/// Implementations use interior mutability: a limiter shares its limits with the
/// completion handlers and timers that release them.
pub trait Limit: Debug + Send + Sync {
    /// Installs the notifier fired when previously denied capacity frees up.
    ///
    /// A later call replaces the earlier notifier.
    fn set_on_unblock(&self, notifier: Unblock);

    /// Reserves one unit of this limit for `call`.
    ///
    /// Returning `false` must leave the limit exactly as it was.
    fn acquire(&self, call: CallId) -> bool;

    /// Gives back the unit reserved for `call`.
    fn release(&self, call: CallId, release: Release);
}

/// A limit that admits everything.
///
/// It notifies on every completed release, which makes it a convenient base for
/// limits that only care about some of the calls they see.
#[derive(Debug, Default)]
pub struct Unlimited {
    notifier: Notifier,
}

impl Unlimited {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Limit for Unlimited {
    fn set_on_unblock(&self, notifier: Unblock) {
        self.notifier.set(notifier);
    }

    fn acquire(&self, _call: CallId) -> bool {
        true
    }

    fn release(&self, _call: CallId, release: Release) {
        if release == Release::Completed {
            self.notifier.fire(None);
        }
    }
}

#[cfg(test)]
mod unlimited_tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn it_releases_without_a_notifier() {
        let limit = Unlimited::new();
        let call = CallId::next();

        assert!(limit.acquire(call));
        limit.release(call, Release::Completed);
    }

    #[test]
    fn it_notifies_when_a_call_completes() {
        let limit = Unlimited::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        limit.set_on_unblock(Arc::new(move |_: Option<NonZeroUsize>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let call = CallId::next();
        assert!(limit.acquire(call));
        limit.release(call, Release::Completed);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn it_stays_silent_on_undo() {
        let limit = Unlimited::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        limit.set_on_unblock(Arc::new(move |_: Option<NonZeroUsize>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let call = CallId::next();
        assert!(limit.acquire(call));
        limit.release(call, Release::Undo);

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn call_ids_are_distinct() {
        let first = CallId::next();
        let second = CallId::next();

        assert_ne!(first, second);
        assert!(first < second);
    }
}
