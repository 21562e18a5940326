mod app;
mod config;
mod db;
mod generators;
mod metrics;
mod pool;
mod schema;
mod shutdown;
mod sql;

use std::time::Duration;

use anyhow::Result;
use mimalloc::MiMalloc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::shutdown::Shutdown;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const MIN_WORKER_THREADS: usize = 10;
const DEFAULT_PARALLELISM: usize = 4;
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let cfg = config::Config::from_file("config.toml")?;

    init_tracing()?;

    let worker_threads = calculate_worker_threads(cfg.runtime_threads);

    // Setup graceful shutdown signal
    let shutdown = Shutdown::new();
    let signal = shutdown.clone();

    ctrlc::set_handler(move || {
        tracing::warn!("shutdown_signal_received");
        signal.trigger();
    })?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(async move {
        tracing::info!(
            connect_string = cfg.database.connect_string,
            username = cfg.database.username,
            worker_threads,
            pool_size = cfg.pool.size,
            "starting_oracle_load_generator"
        );

        if let Err(e) = app::run(cfg, shutdown).await {
            tracing::error!(error = format!("{e:#}"), "load_generator_failed");
            std::process::exit(1);
        }
    });

    // Blocking jobs that outlived the pool's grace period are abandoned here
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_file(false)
                .with_line_number(false)
                .with_level(true)
                .with_target(false),
        )
        .with(EnvFilter::from_default_env().add_directive("oracle_loadgen=info".parse()?))
        .init();

    Ok(())
}

fn calculate_worker_threads(config_threads: Option<usize>) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_PARALLELISM);

    config_threads
        .unwrap_or(available)
        .max(available)
        .max(MIN_WORKER_THREADS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_threads_never_drop_below_minimum() {
        assert!(calculate_worker_threads(Some(1)) >= MIN_WORKER_THREADS);
        assert!(calculate_worker_threads(None) >= MIN_WORKER_THREADS);
    }

    #[test]
    fn configured_threads_above_parallelism_are_kept() {
        assert_eq!(calculate_worker_threads(Some(4096)), 4096);
    }
}
