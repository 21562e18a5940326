use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time;
use tracing::info;

use crate::db::ErrorKind;

const PROBE_INTERVAL: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_millis(750);

/// Shared counters for every generator. Cloning shares the same counters.
#[derive(Clone, Default)]
pub struct Metrics {
    connections: Arc<AtomicU64>,
    connect_failures: Arc<AtomicU64>,
    statements: Arc<AtomicU64>,
    rows_fetched: Arc<AtomicU64>,
    rows_written: Arc<AtomicU64>,
    commits: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
    bursts: Arc<AtomicU64>,
    total_statement_ms: Arc<AtomicU64>,
    total_ping_ms: Arc<AtomicU64>,
    ping_count: Arc<AtomicU64>,
    // Error categorization
    timeout_errors: Arc<AtomicU64>,
    connection_errors: Arc<AtomicU64>,
    other_errors: Arc<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, rows: u64, elapsed_ms: u64) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        self.rows_fetched.fetch_add(rows, Ordering::Relaxed);
        self.total_statement_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn record_write(&self, rows: u64, elapsed_ms: u64) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
        self.total_statement_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_burst(&self) {
        self.bursts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Timeout => &self.timeout_errors,
            ErrorKind::Connection => &self.connection_errors,
            ErrorKind::Other => &self.other_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_ping(&self, ping_ms: u64) {
        self.total_ping_ms.fetch_add(ping_ms, Ordering::Relaxed);
        self.ping_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            statements: self.statements.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            bursts: self.bursts.load(Ordering::Relaxed),
            total_statement_ms: self.total_statement_ms.load(Ordering::Relaxed),
            total_ping_ms: self.total_ping_ms.load(Ordering::Relaxed),
            ping_count: self.ping_count.load(Ordering::Relaxed),
            timeout_errors: self.timeout_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections: u64,
    pub connect_failures: u64,
    pub statements: u64,
    pub rows_fetched: u64,
    pub rows_written: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub bursts: u64,
    pub total_statement_ms: u64,
    pub total_ping_ms: u64,
    pub ping_count: u64,
    pub timeout_errors: u64,
    pub connection_errors: u64,
    pub other_errors: u64,
}

impl MetricsSnapshot {
    /// Counter deltas between `earlier` and `self`.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.saturating_sub(earlier.connections),
            connect_failures: self.connect_failures.saturating_sub(earlier.connect_failures),
            statements: self.statements.saturating_sub(earlier.statements),
            rows_fetched: self.rows_fetched.saturating_sub(earlier.rows_fetched),
            rows_written: self.rows_written.saturating_sub(earlier.rows_written),
            commits: self.commits.saturating_sub(earlier.commits),
            rollbacks: self.rollbacks.saturating_sub(earlier.rollbacks),
            bursts: self.bursts.saturating_sub(earlier.bursts),
            total_statement_ms: self
                .total_statement_ms
                .saturating_sub(earlier.total_statement_ms),
            total_ping_ms: self.total_ping_ms.saturating_sub(earlier.total_ping_ms),
            ping_count: self.ping_count.saturating_sub(earlier.ping_count),
            timeout_errors: self.timeout_errors.saturating_sub(earlier.timeout_errors),
            connection_errors: self
                .connection_errors
                .saturating_sub(earlier.connection_errors),
            other_errors: self.other_errors.saturating_sub(earlier.other_errors),
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.timeout_errors + self.connection_errors + self.other_errors
    }

    pub fn error_rate(&self) -> f64 {
        let attempts = self.statements + self.total_errors();
        if attempts > 0 {
            (self.total_errors() as f64 / attempts as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn avg_statement_ms(&self) -> f64 {
        if self.statements == 0 {
            0.0
        } else {
            self.total_statement_ms as f64 / self.statements as f64
        }
    }

    pub fn avg_ping_ms(&self) -> f64 {
        if self.ping_count == 0 {
            0.0
        } else {
            self.total_ping_ms as f64 / self.ping_count as f64
        }
    }

    pub fn statements_per_sec(&self, secs: f64) -> f64 {
        if secs > 0.0 {
            self.statements as f64 / secs
        } else {
            0.0
        }
    }
}

pub async fn report_metrics_loop(
    metrics: Metrics,
    run_id: String,
    interval_secs: u64,
    start: Instant,
) {
    let interval_secs = interval_secs.max(1);
    let mut prev_snapshot = metrics.get_snapshot();

    loop {
        time::sleep(Duration::from_secs(interval_secs)).await;

        let current = metrics.get_snapshot();
        let interval = current.since(&prev_snapshot);
        let elapsed = start.elapsed().as_secs_f64();

        info!(
            event = "load_tick",
            run_id = %run_id,
            interval_secs,
            statements_per_sec = interval.statements_per_sec(interval_secs as f64),
            rows_fetched = interval.rows_fetched,
            rows_written = interval.rows_written,
            commits = interval.commits,
            rollbacks = interval.rollbacks,
            connections = interval.connections,
            connect_failures = interval.connect_failures,
            errors = interval.total_errors(),
            avg_statement_ms = interval.avg_statement_ms(),
            avg_ping_ms = interval.avg_ping_ms(),
            total_duration_secs = elapsed,
            total_statements = current.statements,
            overall_statements_per_sec = current.statements_per_sec(elapsed),
            error_rate_percent = current.error_rate(),
            avg_statement_ms_overall = current.avg_statement_ms(),
            avg_ping_ms_overall = current.avg_ping_ms(),
            bursts = current.bursts,
            timeout_errors = current.timeout_errors,
            connection_errors = current.connection_errors,
            other_errors = current.other_errors,
        );
        prev_snapshot = current;
    }
}

pub fn log_final_results(run_id: &str, snapshot: &MetricsSnapshot, total_duration: f64) {
    info!(
        event = "load_done",
        run_id = %run_id,
        total_duration_secs = total_duration,
        total_statements = snapshot.statements,
        overall_statements_per_sec = snapshot.statements_per_sec(total_duration),
        rows_fetched = snapshot.rows_fetched,
        rows_written = snapshot.rows_written,
        commits = snapshot.commits,
        rollbacks = snapshot.rollbacks,
        connections = snapshot.connections,
        connect_failures = snapshot.connect_failures,
        bursts = snapshot.bursts,
        error_rate_percent = snapshot.error_rate(),
        avg_statement_ms_overall = snapshot.avg_statement_ms(),
        avg_ping_ms_overall = snapshot.avg_ping_ms(),
        timeout_errors = snapshot.timeout_errors,
        connection_errors = snapshot.connection_errors,
        other_errors = snapshot.other_errors,
    );
}

/// Connect-probes the listener once per second and records the connect
/// latency in ms.
pub async fn tcp_probe_task(host: String, port: u16, metrics: Metrics) {
    let addr = format!("{host}:{port}");
    loop {
        let t0 = Instant::now();
        let res = time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr)).await;
        if let Ok(Ok(_stream)) = res {
            metrics.record_ping(t0.elapsed().as_millis() as u64);
        }
        time::sleep(PROBE_INTERVAL).await;
    }
}
