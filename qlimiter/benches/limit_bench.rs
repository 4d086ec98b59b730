use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use qlimiter::CallId;
use qlimiter::Completion;
use qlimiter::Limit;
use qlimiter::LimitConcurrent;
use qlimiter::LimitInterval;
use qlimiter::LimitPerInterval;
use qlimiter::Limiter;
use qlimiter::LimiterOptions;
use qlimiter::Release;
use qlimiter::Unblock;

const DISPATCH_COUNT: usize = 10_000;

// pass-fail-pass-fail gating, unblocking on every completion
#[derive(Default)]
struct Alternating {
    tests: AtomicUsize,
    notifier: Mutex<Option<Unblock>>,
}

impl fmt::Debug for Alternating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alternating").finish()
    }
}

impl Limit for Alternating {
    fn set_on_unblock(&self, notifier: Unblock) {
        *self.notifier.lock() = Some(notifier);
    }

    fn acquire(&self, _call: CallId) -> bool {
        self.tests.fetch_add(1, Ordering::Relaxed) % 2 == 0
    }

    fn release(&self, _call: CallId, release: Release) {
        if release == Release::Completed {
            let notifier = self.notifier.lock().clone();
            if let Some(notifier) = notifier {
                notifier(None);
            }
        }
    }
}

// An acquire followed by a rollback leaves every built-in limit where it started,
// so the cycle can be repeated without timers or a runtime.
fn bench_single_limit<L: Limit>(group_name: &str, c: &mut Criterion, limit: Arc<L>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("acquire-undo", |b| {
        b.iter(|| {
            let call = CallId::next();
            if black_box(limit.as_ref()).acquire(call) {
                limit.release(call, Release::Undo);
            }
        })
    });

    group.finish();
}

fn bench_parallel_limit<L: Limit + 'static>(group_name: &str, c: &mut Criterion, limit: Arc<L>) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let l = Arc::clone(&limit);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait();
                            for _ in 0..iters_per_thread {
                                let call = CallId::next();
                                if black_box(l.acquire(call)) {
                                    l.release(call, Release::Undo);
                                }
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("Limiter-Dispatch");
    group.sample_size(20);

    group.bench_function(format!("alternating-{DISPATCH_COUNT}"), |b| {
        b.to_async(&runtime).iter(|| async {
            let options = LimiterOptions::new().with_limit(Arc::new(Alternating::default()));
            let limiter = Limiter::new(|_: usize, done: Completion<()>| done.complete(()), &options);
            run_dispatch(&limiter).await;
        })
    });

    group.bench_function(format!("max-concurrent-2-{DISPATCH_COUNT}"), |b| {
        b.to_async(&runtime).iter(|| async {
            let options = LimiterOptions::new().with_max_concurrent(2);
            let limiter = Limiter::new(|_: usize, done: Completion<()>| done.complete(()), &options);
            run_dispatch(&limiter).await;
        })
    });

    group.finish();
}

async fn run_dispatch(limiter: &Limiter<usize, ()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    for n in 0..DISPATCH_COUNT {
        let tx = tx.clone();
        limiter.invoke(n, move |_| {
            let _ = tx.send(());
        });
    }
    for _ in 0..DISPATCH_COUNT {
        let _ = rx.recv().await;
    }
}

fn run_all_benches(c: &mut Criterion) {
    let limit = NonZeroUsize::new(1_000_000).unwrap();
    let period = Duration::from_secs(60);

    let concurrent = Arc::new(LimitConcurrent::new(limit));
    let interval = Arc::new(LimitInterval::new(Duration::ZERO));
    let per_interval = Arc::new(LimitPerInterval::new(limit, period));

    bench_single_limit("LimitConcurrent", c, Arc::clone(&concurrent));
    bench_parallel_limit("LimitConcurrent", c, concurrent);

    bench_single_limit("LimitInterval", c, Arc::clone(&interval));
    bench_parallel_limit("LimitInterval", c, interval);

    bench_single_limit("LimitPerInterval", c, Arc::clone(&per_interval));
    bench_parallel_limit("LimitPerInterval", c, per_interval);

    bench_dispatch(c);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
