use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, Connector, OracleConnector};
use crate::generators::{self, LoadContext};
use crate::metrics::{self, Metrics};
use crate::pool::WorkerPool;
use crate::schema;
use crate::shutdown::Shutdown;

const MONITORING_QUERIES: [&str; 3] = [
    "SELECT event, total_waits, time_waited FROM v$system_event WHERE wait_class != 'Idle' ORDER BY time_waited DESC",
    "SELECT blocking_session, sid, event, seconds_in_wait FROM v$session WHERE blocking_session IS NOT NULL",
    "SELECT sql_id, executions, elapsed_time/1000000 elapsed_sec FROM v$sql WHERE elapsed_time > 1000000 ORDER BY elapsed_time DESC",
];

pub async fn run(cfg: Config, shutdown: Shutdown) -> Result<()> {
    let connector: Arc<dyn Connector> = Arc::new(OracleConnector::new(&cfg.database));
    run_with(cfg, connector, shutdown).await
}

/// Sets up the schema, starts every enabled generator and blocks until
/// shutdown is triggered.
pub async fn run_with(cfg: Config, connector: Arc<dyn Connector>, shutdown: Shutdown) -> Result<()> {
    let run_id = Uuid::new_v4().to_string();

    if cfg.setup.enabled {
        let setup_connector = Arc::clone(&connector);
        let setup = cfg.setup.clone();
        tokio::task::spawn_blocking(move || schema::setup_test_data(setup_connector.as_ref(), &setup))
            .await
            .context("schema setup task")??;
    } else {
        info!("schema_setup_skipped");
    }

    let metrics = Metrics::new();
    let start = Instant::now();
    let ctx = Arc::new(LoadContext {
        connector,
        metrics: metrics.clone(),
        shutdown: shutdown.clone(),
        max_order_id: i64::from(cfg.setup.seed_orders.max(1)),
        max_lock_target: i64::from(cfg.setup.seed_lock_targets.max(1)),
    });
    let pool = Arc::new(WorkerPool::new(cfg.pool.size, shutdown.clone()));

    let (probe_host, probe_port) = db::listener_address(&cfg.database.connect_string);
    let probe_handle = tokio::spawn(metrics::tcp_probe_task(
        probe_host,
        probe_port,
        metrics.clone(),
    ));
    let metrics_handle = tokio::spawn(metrics::report_metrics_loop(
        metrics.clone(),
        run_id.clone(),
        cfg.metrics_interval_secs,
        start,
    ));

    let scheduler = generators::start_generators(&cfg.generators, &ctx, &pool);

    info!(
        run_id = %run_id,
        system_events = MONITORING_QUERIES[0],
        blocking_sessions = MONITORING_QUERIES[1],
        slow_sql = MONITORING_QUERIES[2],
        "load_generation_running"
    );

    shutdown.wait().await;
    info!("shutting_down");

    let grace = Duration::from_secs(cfg.pool.shutdown_grace_secs);
    pool.shutdown(grace).await;
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }

    metrics_handle.abort();
    let _ = metrics_handle.await;
    probe_handle.abort();
    let _ = probe_handle.await;

    metrics::log_final_results(&run_id, &metrics.get_snapshot(), start.elapsed().as_secs_f64());
    info!("load_generator_stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeConnector;

    fn test_config() -> Config {
        let toml = r#"
            metrics_interval_secs = 1

            [database]
            connect_string = "//127.0.0.1:1/TEST"
            username = "u"
            password = "p"

            [setup]
            seed_orders = 100
            seed_lock_targets = 10

            [generators]
            buffer_busy_workers = 2
            burst_interval_secs = 1
        "#;
        Config::from_toml_str(toml, |_| None).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_until_shutdown_then_stops_cleanly() {
        let fake = FakeConnector::new();
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.trigger();
        });

        tokio::time::timeout(
            Duration::from_secs(20),
            run_with(test_config(), Arc::new(fake.clone()), shutdown),
        )
        .await
        .expect("run_with did not stop")
        .unwrap();

        let log = fake.log();
        assert!(log.iter().any(|l| l.contains("CREATE TABLE LOAD_TEST_ORDERS")));
        assert!(log.iter().any(|l| l.contains("UPDATE LOAD_TEST_LOCK_TARGET")));
        assert!(log.iter().any(|l| l.starts_with("QUERY")));
    }

    #[tokio::test]
    async fn setup_failure_is_returned() {
        let fake = FakeConnector::new();
        fake.fail_next_connects(1);

        let result = run_with(test_config(), Arc::new(fake), Shutdown::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn setup_can_be_skipped() {
        let fake = FakeConnector::new();
        let mut cfg = test_config();
        cfg.setup.enabled = false;
        cfg.generators = crate::config::GeneratorsConfig {
            cpu_intensive: false,
            io_intensive: false,
            lock_contention: false,
            enqueue_waits: false,
            latch_waits: false,
            log_file_waits: false,
            direct_path_reads: false,
            db_file_sequential_reads: true,
            buffer_busy_workers: 0,
            bursts: false,
            burst_interval_secs: 10,
        };
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.trigger();
        });

        run_with(cfg, Arc::new(fake.clone()), shutdown).await.unwrap();

        let log = fake.log();
        assert!(!log.iter().any(|l| l.contains("CREATE TABLE")));
        assert!(log.iter().all(|l| l.contains(crate::sql::POINT_LOOKUP)));
    }
}
