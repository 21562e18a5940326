use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time;

/// Granularity at which blocking sleepers notice shutdown.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Cooperative shutdown flag shared by every generator, the pool and the
/// Ctrl+C handler.
#[derive(Clone, Default, Debug)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Blocking sleep. Returns `false` as soon as shutdown is observed,
    /// `true` once the whole duration has elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(POLL_SLICE.min(deadline - now));
        }
    }

    /// Async flavour of [`Shutdown::sleep`] for tasks on the runtime. Wakes
    /// as soon as [`Shutdown::trigger`] is called.
    pub async fn sleep_async(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = time::sleep(duration) => !self.is_triggered(),
            _ = self.wait() => false,
        }
    }

    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Registered before the flag check so a concurrent trigger is not missed
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_runs_to_completion_without_shutdown() {
        let shutdown = Shutdown::new();
        let t0 = Instant::now();

        assert!(shutdown.sleep(Duration::from_millis(120)));
        assert!(t0.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn sleep_returns_early_once_triggered() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.trigger();
        });

        let t0 = Instant::now();
        assert!(!shutdown.sleep(Duration::from_secs(30)));
        assert!(t0.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn wait_completes_after_trigger() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        time::timeout(Duration::from_secs(5), shutdown.wait())
            .await
            .expect("wait should observe the trigger");
        assert!(!shutdown.sleep_async(Duration::from_secs(30)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn trigger_wakes_every_async_waiter_at_once() {
        let shutdown = Shutdown::new();
        let mut waiters = Vec::new();
        for i in 0..4 {
            let s = shutdown.clone();
            waiters.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    s.wait().await;
                    false
                } else {
                    s.sleep_async(Duration::from_secs(60)).await
                }
            }));
        }
        time::sleep(Duration::from_millis(100)).await;

        let t0 = Instant::now();
        shutdown.trigger();
        for waiter in waiters {
            let completed = time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake on trigger")
                .unwrap();
            assert!(!completed);
        }
        assert!(t0.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn sleep_async_runs_to_completion_without_shutdown() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep_async(Duration::from_millis(20)).await);
    }
}
