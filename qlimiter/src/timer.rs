use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::LimitError;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// A restartable one-shot timer running on a tokio runtime.
///
/// The runtime is the one current when the timer is first armed; later starts
/// reuse it, so the timer may be re-armed from threads outside the runtime.
///
/// Starting an armed timer cancels the pending expiry first, so at most one
/// callback is ever scheduled. A stale task that wakes after being superseded
/// notices the generation changed and does nothing.
pub struct Timer {
    callback: Callback,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: OnceLock<Handle>,
}

impl Timer {
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
            runtime: OnceLock::new(),
        }
    }

    /// Arms the timer to fire once after `delay`, replacing any pending expiry.
    pub fn start(&self, delay: Duration) -> Result<(), LimitError> {
        let handle = match self.runtime.get() {
            Some(handle) => handle,
            None => {
                let current = Handle::try_current().map_err(|_| LimitError::NoRuntime)?;
                self.runtime.get_or_init(|| current)
            }
        };

        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.generation.clone();
        let callback = self.callback.clone();
        trace!(?delay, generation, "timer armed");
        *task = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) == generation {
                callback();
            }
        }));
        Ok(())
    }

    /// Cancels a pending expiry. Stopping an idle timer is a no-op.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.task.lock().take() {
            previous.abort();
        }
    }

    /// Whether an expiry is scheduled and has not yet fired.
    pub fn is_armed(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("armed", &self.is_armed())
            .finish()
    }
}
