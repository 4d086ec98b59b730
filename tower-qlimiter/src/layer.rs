use std::fmt;
use std::marker::PhantomData;

use qlimiter::LimiterOptions;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::service::QueueLimitService;

/// Queues requests until every configured limit admits them.
///
/// Each call to [`Layer::layer`] builds one limiter, shared by every clone of
/// the service it returns. Built-in limits are fresh per layered service;
/// limits added with [`LimiterOptions::with_limit`] are shared as given.
pub struct QueueLimitLayer<Req> {
    options: LimiterOptions,
    _req: PhantomData<fn(Req)>,
}

impl<Req> Clone for QueueLimitLayer<Req> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            _req: PhantomData,
        }
    }
}

impl<Req> fmt::Debug for QueueLimitLayer<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueLimitLayer")
            .field("options", &self.options)
            .finish()
    }
}

impl<Req> QueueLimitLayer<Req> {
    /// Create a QueueLimitLayer
    pub fn new(options: LimiterOptions) -> Self {
        Self {
            options,
            _req: PhantomData,
        }
    }
}

impl<S, Req> Layer<S> for QueueLimitLayer<Req>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Service = QueueLimitService<S, Req>;

    fn layer(&self, service: S) -> Self::Service {
        QueueLimitService::new(service, &self.options)
    }
}
