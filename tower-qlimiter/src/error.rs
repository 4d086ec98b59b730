/// Errors produced by the queue limit middleware itself.
///
/// Errors from the inner service are passed through unchanged, boxed into a
/// [`tower::BoxError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The request was accepted but never produced a response, for example
    /// because the inner service panicked or no runtime was available to run it.
    #[error("Request was abandoned before the inner service responded")]
    Abandoned,
}
