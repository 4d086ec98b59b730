use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower::util::BoxCloneSyncService;

use qlimiter::LimiterOptions;

use crate::QueueLimitLayer;

/// Queue-limit a service and erase its type.
pub fn make_queue_limited_svc<V, Req, Resp>(
    options: LimiterOptions,
    svc: V,
) -> BoxCloneSyncService<Req, Resp, BoxError>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    V: Service<Req, Response = Resp, Error = BoxError> + Clone + Send + 'static,
    <V as Service<Req>>::Future: Send + 'static,
{
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(QueueLimitLayer::new(options))
            .service(svc),
    )
}

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a queueing limit layer
    fn queue_limit<Req>(
        self,
        options: LimiterOptions,
    ) -> ServiceBuilder<Stack<QueueLimitLayer<Req>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn queue_limit<Req>(
        self,
        options: LimiterOptions,
    ) -> ServiceBuilder<Stack<QueueLimitLayer<Req>, L>> {
        self.layer(QueueLimitLayer::new(options))
    }
}
