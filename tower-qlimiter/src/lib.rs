//! # Tower QLimiter
//!
//! `tower-qlimiter` puts a [`qlimiter::Limiter`] in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! Requests are never rejected for lack of capacity. A request that cannot be
//! admitted by every configured limit waits in a FIFO queue and is sent to the
//! inner service as soon as the limits allow, in the order it arrived.
//!
//! ```rust
//! use qlimiter::LimiterOptions;
//! use tower::BoxError;
//! use tower::ServiceBuilder;
//! use tower::ServiceExt;
//! use tower::service_fn;
//! use tower_qlimiter::ServiceBuilderExt;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), BoxError> {
//!     let svc = ServiceBuilder::new()
//!         .queue_limit::<u64>(LimiterOptions::new().with_max_concurrent(8))
//!         .service(service_fn(|n: u64| async move { Ok::<_, BoxError>(n + 1) }));
//!
//!     assert_eq!(svc.oneshot(41).await?, 42);
//!     Ok(())
//! }
//! ```
//!
//! ## Metrics
//!
//! Every service records, through the global OpenTelemetry meter
//! `queue_limit_service`, how many requests were dispatched straight away
//! (`calls_dispatched`) and how many had to wait (`calls_queued`).

mod error;
mod layer;
mod service;
mod utils;


pub use error::QueueError;
pub use layer::QueueLimitLayer;
pub use service::QueueLimitService;
pub use service::ResponseFuture;
pub use utils::ServiceBuilderExt;
pub use utils::make_queue_limited_svc;
