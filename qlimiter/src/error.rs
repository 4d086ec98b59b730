/// Errors produced while configuring or driving a [`crate::Limiter`].
///
/// Steady-state admission never fails: a denied call is queued, not rejected.
/// Errors only surface while options are being built, or when a call could not
/// be delivered to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// A configuration value was not acceptable, e.g. an unknown interval name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Timers and dispatched calls run on tokio, and none was available.
    #[error("no tokio runtime is available to run limiter tasks")]
    NoRuntime,

    /// The operation dropped its completion without producing a value.
    #[error("call was abandoned before it completed")]
    Abandoned,
}
