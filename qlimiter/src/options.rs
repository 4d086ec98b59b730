use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::Limit;
use super::LimitConcurrent;
use super::LimitError;
use super::LimitInterval;
use super::LimitPerInterval;

/// Length of a rate window or of a minimum spacing.
///
/// Defaults to one second. Parses from a number of milliseconds or one of the
/// names `second`, `minute`, `hour` and `day`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "IntervalRepr")]
pub struct Interval(Duration);

impl Interval {
    pub const SECOND: Interval = Interval(Duration::from_secs(1));
    pub const MINUTE: Interval = Interval(Duration::from_secs(60));
    pub const HOUR: Interval = Interval(Duration::from_secs(60 * 60));
    pub const DAY: Interval = Interval(Duration::from_secs(24 * 60 * 60));

    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub const fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::SECOND
    }
}

impl From<Duration> for Interval {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<Interval> for Duration {
    fn from(interval: Interval) -> Self {
        interval.0
    }
}

impl FromStr for Interval {
    type Err = LimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "second" => Ok(Self::SECOND),
            "minute" => Ok(Self::MINUTE),
            "hour" => Ok(Self::HOUR),
            "day" => Ok(Self::DAY),
            other => other.parse::<u64>().map(Self::from_millis).map_err(|_| {
                LimitError::InvalidArgument(format!("unrecognized interval {other:?}"))
            }),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntervalRepr {
    Millis(u64),
    Name(String),
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = LimitError;

    fn try_from(repr: IntervalRepr) -> Result<Self, Self::Error> {
        match repr {
            IntervalRepr::Millis(millis) => Ok(Self::from_millis(millis)),
            IntervalRepr::Name(name) => name.parse(),
        }
    }
}

/// Configuration of the limits placed in front of an operation.
///
/// Every option is independent. A limiter built from empty options admits every
/// call immediately.
///
/// ```rust
/// use qlimiter::Interval;
/// use qlimiter::LimiterOptions;
///
/// let options = LimiterOptions::new()
///     .with_max_concurrent(4)
///     .with_max_per_interval(100)
///     .with_interval(Interval::MINUTE);
///
/// assert_eq!(options.build_limits().len(), 2);
/// ```
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimiterOptions {
    max_concurrent: Option<usize>,
    min_interval: Option<Interval>,
    max_per_interval: Option<usize>,
    interval: Interval,
    #[serde(skip)]
    limits: Vec<Arc<dyn Limit>>,
}

impl LimiterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how many calls may run at once. Zero leaves concurrency unlimited.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    /// Requires at least `interval` between two call starts.
    pub fn with_min_interval(mut self, interval: impl Into<Interval>) -> Self {
        self.min_interval = Some(interval.into());
        self
    }

    /// Caps how many calls are counted per window. Zero leaves it unlimited.
    pub fn with_max_per_interval(mut self, max: usize) -> Self {
        self.max_per_interval = Some(max);
        self
    }

    /// Sets the window used by [`LimiterOptions::with_max_per_interval`].
    pub fn with_interval(mut self, interval: impl Into<Interval>) -> Self {
        self.interval = interval.into();
        self
    }

    /// Adds a pre-built limit. Caller supplied limits are consulted first, in
    /// the order they were added.
    pub fn with_limit(mut self, limit: Arc<dyn Limit>) -> Self {
        self.limits.push(limit);
        self
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Builds the ordered limit list: caller supplied limits, then concurrency,
    /// minimum spacing and per-window limits.
    ///
    /// Built-in limits are created fresh on every call, so two limiters built
    /// from the same options never share state. Caller supplied limits are
    /// shared as given.
    pub fn build_limits(&self) -> Vec<Arc<dyn Limit>> {
        let mut limits = self.limits.clone();

        if let Some(max) = self.max_concurrent.and_then(NonZeroUsize::new) {
            limits.push(Arc::new(LimitConcurrent::new(max)));
        }
        if let Some(interval) = self.min_interval.filter(|i| !i.0.is_zero()) {
            limits.push(Arc::new(LimitInterval::new(interval.0)));
        }
        if let Some(max) = self.max_per_interval.and_then(NonZeroUsize::new) {
            limits.push(Arc::new(LimitPerInterval::new(max, self.interval.0)));
        }
        limits
    }
}

impl fmt::Debug for LimiterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterOptions")
            .field("max_concurrent", &self.max_concurrent)
            .field("min_interval", &self.min_interval)
            .field("max_per_interval", &self.max_per_interval)
            .field("interval", &self.interval)
            .field("limits", &self.limits.len())
            .finish()
    }
}
