use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use qlimiter::Call;
use qlimiter::Limiter;
use qlimiter::LimiterOptions;
use tokio::sync::oneshot;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tracing::warn;

use crate::error::QueueError;

#[derive(Clone, Debug)]
struct QueueLimitServiceMetrics {
    dispatched: Counter<u64>,
    queued: Counter<u64>,
}

/// A service that admits requests through a [`Limiter`] before handing them to
/// the inner service.
///
/// The inner service is cloned for every admitted request and driven with
/// [`ServiceExt::oneshot`], so its readiness is awaited off the caller's path.
/// It only needs to be `Send`; the prototype is kept behind a lock.
pub struct QueueLimitService<S, Req>
where
    S: Service<Req>,
{
    limiter: Limiter<Req, Result<S::Response, BoxError>>,
    instruments: QueueLimitServiceMetrics,
}

pin_project! {
    /// Resolves with the inner service's response once the request has been
    /// admitted and served.
    pub struct ResponseFuture<T> {
        #[pin]
        rx: oneshot::Receiver<Result<T, BoxError>>,
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.rx.poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Box::new(QueueError::Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S, Req> Clone for QueueLimitService<S, Req>
where
    S: Service<Req>,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<S, Req> fmt::Debug for QueueLimitService<S, Req>
where
    S: Service<Req>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueLimitService")
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl<S, Req> Service<Req> for QueueLimitService<S, Req>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Response>;

    // The queue is unbounded, so there is never a reason to hold a caller back
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let (tx, rx) = oneshot::channel();
        let call = Call::new(req, move |res: Result<S::Response, BoxError>| {
            let _ = tx.send(res);
        });

        match self.limiter.schedule_call(call) {
            Some(true) => self.instruments.dispatched.add(1, &[]),
            Some(false) => self.instruments.queued.add(1, &[]),
            None => warn!("request could not be scheduled"),
        }

        ResponseFuture { rx }
    }
}

impl<S, Req> QueueLimitService<S, Req>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    pub fn new(inner: S, options: &LimiterOptions) -> Self {
        let meter = global::meter("queue_limit_service");
        let instruments = QueueLimitServiceMetrics {
            dispatched: meter.u64_counter("calls_dispatched").build(),
            queued: meter.u64_counter("calls_queued").build(),
        };

        let inner = Mutex::new(inner);
        let limiter: Limiter<Req, Result<S::Response, BoxError>> = Limiter::from_async(
            move |req: Req| {
                let svc = inner.lock().clone();
                async move { svc.oneshot(req).await.map_err(Into::into) }
            },
            options,
        );

        Self {
            limiter,
            instruments,
        }
    }

    /// The limiter shared by every clone of this service.
    pub fn limiter(&self) -> &Limiter<Req, Result<S::Response, BoxError>> {
        &self.limiter
    }
}
