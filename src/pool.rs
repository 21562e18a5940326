use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time;
use tracing::{debug, error, warn};

use crate::shutdown::Shutdown;

type Job = (&'static str, Box<dyn FnOnce() + Send>);

/// Fixed-size pool of blocking jobs. At most `size` jobs run at once; the
/// rest wait, in submission order, for a free slot.
pub struct WorkerPool {
    size: usize,
    slots: Arc<Semaphore>,
    queue: Mutex<Option<UnboundedSender<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<JoinSet<()>>>>,
    shutdown: Shutdown,
}

impl WorkerPool {
    /// Must be called from within a tokio runtime.
    pub fn new(size: usize, shutdown: Shutdown) -> Self {
        let slots = Arc::new(Semaphore::new(size));
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(rx, Arc::clone(&slots), shutdown.clone()));

        Self {
            size,
            slots,
            queue: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            shutdown,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently holding a slot.
    pub fn running(&self) -> usize {
        self.size - self.slots.available_permits()
    }

    /// Queues `job` for execution on the blocking thread pool. Safe to call
    /// from inside another job. Jobs still queued at shutdown never run.
    pub fn submit<F>(&self, name: &'static str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(queue) = self.queue.lock() else {
            error!(job = name, "pool_lock_poisoned");
            return;
        };
        let job: Box<dyn FnOnce() + Send> = Box::new(job);
        let sent = queue
            .as_ref()
            .map(|tx| tx.send((name, job)).is_ok())
            .unwrap_or(false);
        if !sent {
            debug!(job = name, "job_discarded");
        }
    }

    /// Sets the shutdown flag, discards queued jobs and waits up to `grace`
    /// for running ones. Returns `false` if some were still running.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.trigger();
        self.slots.close();
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        let Some(dispatcher) = self.dispatcher.lock().ok().and_then(|mut d| d.take()) else {
            return true;
        };

        let drained = time::timeout(grace, async {
            let Ok(mut running) = dispatcher.await else {
                return false;
            };
            while let Some(result) = running.join_next().await {
                log_job_failure(result);
            }
            true
        })
        .await;

        match drained {
            Ok(clean) => clean,
            Err(_) => {
                warn!(
                    running = self.running(),
                    grace_secs = grace.as_secs_f64(),
                    "pool_shutdown_timed_out"
                );
                false
            }
        }
    }
}

/// Hands queued jobs to the blocking pool one at a time, each only once a
/// slot is free. Returns the jobs still running when the queue closes.
async fn dispatch(
    mut queue: UnboundedReceiver<Job>,
    slots: Arc<Semaphore>,
    shutdown: Shutdown,
) -> JoinSet<()> {
    let mut running = JoinSet::new();

    while let Some((name, job)) = queue.recv().await {
        while let Some(result) = running.try_join_next() {
            log_job_failure(result);
        }

        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            debug!(job = name, "job_discarded");
            break;
        };
        if shutdown.is_triggered() {
            debug!(job = name, "job_discarded");
            break;
        }
        running.spawn_blocking(move || {
            let _permit = permit;
            job();
        });
    }

    running
}

fn log_job_failure(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "job_panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    async fn wait_for(cond: impl Fn() -> bool) {
        time::timeout(Duration::from_secs(5), async {
            while !cond() {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn never_runs_more_than_size_jobs() {
        let pool = WorkerPool::new(2, Shutdown::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.submit("sleeper", move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        wait_for(|| done.load(Ordering::SeqCst) == 6).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.size(), 2);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_jobs_run_in_submission_order() {
        for _ in 0..20 {
            let pool = WorkerPool::new(1, Shutdown::new());
            let gate = Arc::new(AtomicBool::new(false));
            let order = Arc::new(Mutex::new(Vec::new()));

            let held = Arc::clone(&gate);
            pool.submit("gate", move || {
                while !held.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
            wait_for(|| pool.running() == 1).await;

            for i in 0..6 {
                let order = Arc::clone(&order);
                pool.submit("ordered", move || order.lock().unwrap().push(i));
            }
            gate.store(true, Ordering::SeqCst);

            wait_for(|| order.lock().unwrap().len() == 6).await;
            assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
            assert!(pool.shutdown(Duration::from_secs(1)).await);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_discards_queued_jobs() {
        let shutdown = Shutdown::new();
        let pool = WorkerPool::new(1, shutdown.clone());
        let queued_ran = Arc::new(AtomicBool::new(false));

        let looping = shutdown.clone();
        pool.submit("loop", move || while looping.sleep(Duration::from_secs(60)) {});
        wait_for(|| pool.running() == 1).await;

        let flag = Arc::clone(&queued_ran);
        pool.submit("queued", move || flag.store(true, Ordering::SeqCst));

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert!(shutdown.is_triggered());
        assert!(!queued_ran.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_reports_jobs_outliving_grace() {
        let pool = WorkerPool::new(1, Shutdown::new());
        pool.submit("stubborn", || std::thread::sleep(Duration::from_millis(500)));
        wait_for(|| pool.running() == 1).await;

        assert!(!pool.shutdown(Duration::from_millis(50)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_job_frees_its_slot() {
        let pool = WorkerPool::new(1, Shutdown::new());
        let ran = Arc::new(AtomicBool::new(false));

        pool.submit("panics", || panic!("boom"));
        let flag = Arc::clone(&ran);
        pool.submit("after", move || flag.store(true, Ordering::SeqCst));

        wait_for(|| ran.load(Ordering::SeqCst)).await;
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn jobs_can_submit_jobs() {
        let pool = Arc::new(WorkerPool::new(2, Shutdown::new()));
        let ran = Arc::new(AtomicBool::new(false));

        let inner_pool = Arc::clone(&pool);
        let flag = Arc::clone(&ran);
        pool.submit("outer", move || {
            inner_pool.submit("inner", move || flag.store(true, Ordering::SeqCst));
        });

        wait_for(|| ran.load(Ordering::SeqCst)).await;
        assert!(pool.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_after_shutdown_is_a_no_op() {
        let pool = WorkerPool::new(1, Shutdown::new());
        assert!(pool.shutdown(Duration::from_secs(1)).await);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        pool.submit("late", move || flag.store(true, Ordering::SeqCst));
        time::sleep(Duration::from_millis(100)).await;

        assert!(!ran.load(Ordering::SeqCst));
    }
}
