use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::CallId;
use super::Limit;
use super::LimitError;
use super::LimiterOptions;
use super::Release;
use super::WaitQueue;

type Operation<A, R> = Arc<dyn Fn(A, Completion<R>) -> BoxFuture<'static, ()> + Send + Sync>;
type Done<R> = Box<dyn FnOnce(R) + Send>;

/// One invocation of the limited operation: its arguments and the handler that
/// receives the result.
pub struct Call<A, R> {
    args: A,
    done: Option<Done<R>>,
}

impl<A, R> Call<A, R> {
    pub fn new(args: A, done: impl FnOnce(R) + Send + 'static) -> Self {
        Self {
            args,
            done: Some(Box::new(done)),
        }
    }

    /// A call nobody is waiting for. The limiter drops such calls unscheduled.
    pub fn without_completion(args: A) -> Self {
        Self { args, done: None }
    }
}

impl<A: fmt::Debug, R> fmt::Debug for Call<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("args", &self.args)
            .field("has_completion", &self.done.is_some())
            .finish()
    }
}

/// Handed to the operation with each admitted call.
///
/// [`Completion::complete`] delivers the result to the caller and then releases
/// every limit the call holds, last acquired first. A completion dropped without
/// a result still releases the limits, but the caller never hears back.
pub struct Completion<R> {
    call: CallId,
    done: Option<Done<R>>,
    limits: Arc<[Arc<dyn Limit>]>,
    runtime: Handle,
    released: bool,
}

impl<R> Completion<R> {
    pub fn call_id(&self) -> CallId {
        self.call
    }

    pub fn complete(mut self, value: R) {
        if let Some(done) = self.done.take() {
            done(value);
        }
        self.release();
    }

    fn release(&mut self) {
        if mem::replace(&mut self.released, true) {
            return;
        }
        // limits arm their timers on the current runtime
        let _entered = match Handle::try_current() {
            Ok(_) => None,
            Err(_) => Some(self.runtime.enter()),
        };
        for limit in self.limits.iter().rev() {
            limit.release(self.call, Release::Completed);
        }
    }
}

impl<R> Drop for Completion<R> {
    fn drop(&mut self) {
        if !self.released {
            warn!(call = %self.call, "completion dropped without a result, releasing limits");
            self.release();
        }
    }
}

impl<R> fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("call", &self.call)
            .field("released", &self.released)
            .finish()
    }
}

struct Pending<A, R> {
    id: CallId,
    args: A,
    done: Done<R>,
}

struct Gate<A, R> {
    queue: WaitQueue<Pending<A, R>>,
    draining: bool,
    // admissions still allowed by notifications received during this drain
    credits: usize,
}

struct Inner<A, R> {
    operation: Operation<A, R>,
    limits: Arc<[Arc<dyn Limit>]>,
    gate: ReentrantMutex<RefCell<Gate<A, R>>>,
    idle: Notify,
    runtime: OnceLock<Handle>,
}

/// Places an ordered set of limits in front of an operation.
///
/// Calls are admitted through every limit or queued. Queued calls are released
/// in arrival order whenever a limit reports freed capacity. New calls never
/// overtake queued ones.
///
/// `Limiter` is a cheap handle; clones share the same queue and limits.
pub struct Limiter<A, R> {
    inner: Arc<Inner<A, R>>,
}

impl<A, R> Clone for Limiter<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, R> Limiter<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Creates a limiter for an operation that reports its result through a
    /// [`Completion`].
    ///
    /// The operation may complete synchronously or hand the completion on to
    /// some other task or thread. Completing off the runtime is fine; the
    /// limiter's runtime is entered while the limits are released.
    pub fn new<F>(operation: F, options: &LimiterOptions) -> Self
    where
        F: Fn(A, Completion<R>) + Send + Sync + 'static,
    {
        let operation: Operation<A, R> = Arc::new(move |args: A, completion: Completion<R>| {
            operation(args, completion);
            futures::future::ready(()).boxed()
        });
        Self::with_limits(operation, options.build_limits())
    }

    /// Creates a limiter for an async function. A call completes when the
    /// returned future resolves.
    pub fn from_async<F, Fut>(f: F, options: &LimiterOptions) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let operation: Operation<A, R> = Arc::new(move |args: A, completion: Completion<R>| {
            let fut = f(args);
            async move { completion.complete(fut.await) }.boxed()
        });
        Self::with_limits(operation, options.build_limits())
    }

    fn with_limits(operation: Operation<A, R>, limits: Vec<Arc<dyn Limit>>) -> Self {
        let limits: Arc<[Arc<dyn Limit>]> = limits.into();
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<A, R>>| {
            for limit in limits.iter() {
                let weak = weak.clone();
                limit.set_on_unblock(Arc::new(move |hint: Option<NonZeroUsize>| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_unblock(hint);
                    }
                }));
            }
            let runtime = OnceLock::new();
            if let Ok(handle) = Handle::try_current() {
                let _ = runtime.set(handle);
            }
            Inner {
                operation,
                limits: limits.clone(),
                gate: ReentrantMutex::new(RefCell::new(Gate {
                    queue: WaitQueue::new(),
                    draining: false,
                    credits: 0,
                })),
                idle: Notify::new(),
                runtime,
            }
        });
        Self { inner }
    }

    /// Admits `call` now or queues it.
    ///
    /// Returns `Some(true)` if the call was dispatched immediately, `Some(false)`
    /// if it was queued and `None` if it was dropped, either because it has no
    /// completion handler or because no tokio runtime is available to run it.
    pub fn schedule_call(&self, call: Call<A, R>) -> Option<bool> {
        let Some(done) = call.done else {
            warn!("call scheduled without a completion handler, dropping it");
            return None;
        };
        if self.inner.runtime().is_none() {
            error!("{}", LimitError::NoRuntime);
            return None;
        }

        let pending = Pending {
            id: CallId::next(),
            args: call.args,
            done,
        };
        let guard = self.inner.gate.lock();
        let waiting = !guard.borrow().queue.is_empty();
        if !waiting && self.inner.try_admit(pending.id) {
            drop(guard);
            self.inner.dispatch(pending);
            return Some(true);
        }

        let mut gate = guard.borrow_mut();
        debug!(call = %pending.id, queued = gate.queue.len() + 1, "call queued");
        gate.queue.push(pending);
        Some(false)
    }

    /// Invokes the limited operation, delivering its result to `done`.
    ///
    /// Returns whether the call was dispatched immediately. A call dropped for
    /// lack of a runtime also reports `false`.
    pub fn invoke(&self, args: A, done: impl FnOnce(R) + Send + 'static) -> bool {
        self.schedule_call(Call::new(args, done)).unwrap_or(false)
    }

    /// Invokes the limited operation and waits for its result.
    pub async fn call(&self, args: A) -> Result<R, LimitError> {
        let (tx, rx) = oneshot::channel();
        let call = Call::new(args, move |value: R| {
            let _ = tx.send(value);
        });
        match self.schedule_call(call) {
            Some(_) => rx.await.map_err(|_| LimitError::Abandoned),
            None => Err(LimitError::NoRuntime),
        }
    }

    /// Whether any call is still waiting for admission.
    pub fn has_pending_work(&self) -> bool {
        self.queued() > 0
    }

    /// Number of calls waiting for admission.
    pub fn queued(&self) -> usize {
        self.inner.gate.lock().borrow().queue.len()
    }

    /// Resolves once no call is waiting for admission.
    ///
    /// Calls that were dispatched may still be running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.has_pending_work() {
                return;
            }
            notified.await;
        }
    }

    /// The limits consulted for every call, in admission order.
    pub fn limits(&self) -> &[Arc<dyn Limit>] {
        &self.inner.limits
    }
}

impl<A, R> Inner<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn runtime(&self) -> Option<&Handle> {
        if let Some(handle) = self.runtime.get() {
            return Some(handle);
        }
        let handle = Handle::try_current().ok()?;
        Some(self.runtime.get_or_init(|| handle))
    }

    /// Acquires every limit left to right. On the first denial the limits
    /// already taken are rolled back in reverse order.
    fn try_admit(&self, call: CallId) -> bool {
        for (index, limit) in self.limits.iter().enumerate() {
            if !limit.acquire(call) {
                for taken in self.limits[..index].iter().rev() {
                    taken.release(call, Release::Undo);
                }
                trace!(call = %call, denied_by = ?limit, "admission denied");
                return false;
            }
        }
        true
    }

    fn dispatch(&self, pending: Pending<A, R>) {
        let Pending { id, args, done } = pending;
        let Some(handle) = self.runtime.get() else {
            error!(call = %id, "{}", LimitError::NoRuntime);
            for limit in self.limits.iter().rev() {
                limit.release(id, Release::Undo);
            }
            return;
        };
        let completion = Completion {
            call: id,
            done: Some(done),
            limits: self.limits.clone(),
            runtime: handle.clone(),
            released: false,
        };
        trace!(call = %id, "call dispatched");
        let operation = self.operation.clone();
        handle.spawn(async move {
            operation(args, completion).await;
        });
    }

    fn on_unblock(&self, hint: Option<NonZeroUsize>) {
        let guard = self.gate.lock();
        {
            let mut gate = guard.borrow_mut();
            gate.credits = match hint {
                Some(count) => gate.credits.saturating_add(count.get()),
                None => usize::MAX,
            };
            if gate.draining {
                return;
            }
            gate.draining = true;
        }

        loop {
            let head = {
                let gate = guard.borrow();
                if gate.credits == 0 {
                    break;
                }
                match gate.queue.peek() {
                    Some(pending) => pending.id,
                    None => break,
                }
            };
            if !self.try_admit(head) {
                break;
            }
            let pending = {
                let mut gate = guard.borrow_mut();
                gate.credits -= 1;
                gate.queue.shift()
            };
            if let Some(pending) = pending {
                self.dispatch(pending);
            }
        }

        let idle = {
            let mut gate = guard.borrow_mut();
            gate.draining = false;
            gate.credits = 0;
            gate.queue.is_empty()
        };
        drop(guard);
        if idle {
            self.idle.notify_waiters();
        }
    }
}

impl<A, R> fmt::Debug for Limiter<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("limits", &self.inner.limits)
            .field("queued", &self.inner.gate.lock().borrow().queue.len())
            .finish()
    }
}
