use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GeneratorsConfig;
use crate::db::{self, Connector, ErrorKind, Fetch, Session, SqlParam};
use crate::metrics::Metrics;
use crate::pool::WorkerPool;
use crate::shutdown::Shutdown;
use crate::sql;

const HOT_ROWS: i64 = 10;
const MAX_CUSTOMER_ID: i64 = 1000;
const MAX_PRODUCT_ID: i64 = 500;
const MAX_AMOUNT: f64 = 1000.0;

const UNDO_HOLD: Duration = Duration::from_secs(2);
const LIBRARY_CACHE_STATEMENTS: usize = 50;
const ROW_CACHE_LOOKUPS: usize = 30;
const ARCHIVE_LOG_BATCHES: usize = 5;
const HARD_PARSES: usize = 100;
const SQLNET_ROUND_TRIPS: usize = 1000;
const INDEX_CONTENTION_ROWS: usize = 500;
const INDEX_CONTENTION_FLUSH_EVERY: usize = 100;

/// Everything a generator needs, shared by all of them.
pub struct LoadContext {
    pub connector: Arc<dyn Connector>,
    pub metrics: Metrics,
    pub shutdown: Shutdown,
    /// Highest seeded `order_id`; point lookups pick from `1..=max_order_id`.
    pub max_order_id: i64,
    /// Highest seeded lock target id.
    pub max_lock_target: i64,
}

impl LoadContext {
    fn connect(&self) -> Result<MeteredSession> {
        match self.connector.connect() {
            Ok(session) => {
                self.metrics.record_connection();
                Ok(MeteredSession {
                    session,
                    metrics: self.metrics.clone(),
                    shutdown: self.shutdown.clone(),
                })
            }
            Err(e) => {
                self.metrics.record_connect_failure();
                Err(e)
            }
        }
    }
}

/// A session whose statements are counted in [`Metrics`].
struct MeteredSession {
    session: Box<dyn Session>,
    metrics: Metrics,
    shutdown: Shutdown,
}

fn elapsed_ms(t0: Instant) -> u64 {
    t0.elapsed().as_millis() as u64
}

impl MeteredSession {
    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let t0 = Instant::now();
        let rows = self.session.execute(sql, params)?;
        self.metrics.record_write(rows, elapsed_ms(t0));
        Ok(rows)
    }

    fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        self.fetch(sql, params, Fetch::Discard)
    }

    fn query_columns(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        self.fetch(sql, params, Fetch::Columns)
    }

    fn fetch(&mut self, sql: &str, params: &[SqlParam], fetch: Fetch) -> Result<u64> {
        let t0 = Instant::now();
        let rows = self.session.query_drain(sql, params, fetch, &self.shutdown)?;
        self.metrics.record_query(rows, elapsed_ms(t0));
        Ok(rows)
    }

    fn execute_batch(&mut self, sql: &str, rows: &[Vec<SqlParam>]) -> Result<()> {
        let t0 = Instant::now();
        self.session.execute_batch(sql, rows)?;
        self.metrics.record_write(rows.len() as u64, elapsed_ms(t0));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.session.commit()?;
        self.metrics.record_commit();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.session.rollback()?;
        self.metrics.record_rollback();
        Ok(())
    }

    fn set_call_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.session.set_call_timeout(timeout)
    }
}

/// Logs a failed iteration and counts it. Returns the category.
fn report_error(generator: &str, error: &anyhow::Error, metrics: &Metrics) -> ErrorKind {
    let kind = db::classify(error);
    metrics.record_error(kind);

    if let Some(info) = db::ora_error_info(error) {
        warn!(
            generator,
            kind = ?kind,
            ora_code = %info.code,
            ora_message = %info.message,
            offset = info.offset,
            fn_name = %info.fn_name,
            action = %info.action,
            "generator_error"
        );
    } else {
        let cause_chain: String = error
            .chain()
            .skip(1)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(" | caused by: ");
        warn!(
            generator,
            kind = ?kind,
            error = %error,
            cause_chain = %cause_chain,
            "generator_error"
        );
    }
    kind
}

/// Loops that run for the whole life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generator {
    CpuIntensive,
    IoIntensive,
    EnqueueWaits,
    LatchWaits,
    LogFileWaits,
    DirectPathReads,
    DbFileSequentialReads,
    BufferBusyWaits { worker_id: usize },
}

impl Generator {
    pub fn name(&self) -> &'static str {
        match self {
            Generator::CpuIntensive => "cpu_intensive",
            Generator::IoIntensive => "io_intensive",
            Generator::EnqueueWaits => "enqueue_waits",
            Generator::LatchWaits => "latch_waits",
            Generator::LogFileWaits => "log_file_waits",
            Generator::DirectPathReads => "direct_path_reads",
            Generator::DbFileSequentialReads => "db_file_sequential_reads",
            Generator::BufferBusyWaits { .. } => "buffer_busy_waits",
        }
    }

    /// Pause between iterations.
    pub fn interval(&self) -> Duration {
        match self {
            Generator::CpuIntensive => Duration::from_secs(2),
            Generator::IoIntensive => Duration::from_secs(3),
            Generator::EnqueueWaits => Duration::from_secs(1),
            Generator::LatchWaits => Duration::from_millis(500),
            Generator::LogFileWaits => Duration::from_millis(200),
            Generator::DirectPathReads => Duration::from_secs(4),
            Generator::DbFileSequentialReads => Duration::from_secs(1),
            Generator::BufferBusyWaits { .. } => Duration::from_millis(300),
        }
    }

    /// One iteration on a fresh connection.
    fn step(&self, ctx: &LoadContext, rng: &mut StdRng) -> Result<()> {
        let mut conn = ctx.connect()?;
        match *self {
            Generator::CpuIntensive => {
                let query = sql::CPU_INTENSIVE[rng.gen_range(0..sql::CPU_INTENSIVE.len())];
                conn.query(query, &[])?;
            }
            Generator::IoIntensive => {
                // One slot in three is the bulk insert
                let pick = rng.gen_range(0..=sql::IO_AGGREGATES.len());
                match sql::IO_AGGREGATES.get(pick) {
                    Some(query) => {
                        conn.query(query, &[])?;
                    }
                    None => {
                        conn.execute(sql::IO_BULK_INSERT, &[])?;
                        conn.commit()?;
                    }
                }
            }
            Generator::EnqueueWaits => {
                let row_id = rng.gen_range(1..=ctx.max_lock_target);
                conn.execute(sql::ENQUEUE_UPDATE, &[SqlParam::Int(row_id)])?;
                conn.commit()?;
            }
            Generator::LatchWaits => {
                conn.execute(
                    sql::LATCH_INSERT,
                    &[
                        SqlParam::Int(rng.gen_range(1..=MAX_CUSTOMER_ID)),
                        SqlParam::Int(rng.gen_range(1..=MAX_PRODUCT_ID)),
                        SqlParam::Float(rng.r#gen::<f64>() * MAX_AMOUNT),
                    ],
                )?;
                conn.commit()?;
            }
            Generator::LogFileWaits => {
                conn.execute(sql::REDO_INSERT, &[])?;
                conn.commit()?;
            }
            Generator::DirectPathReads => {
                conn.query(sql::PARALLEL_FULL_SCAN, &[])?;
            }
            Generator::DbFileSequentialReads => {
                let order_id = rng.gen_range(1..=ctx.max_order_id);
                conn.query(sql::POINT_LOOKUP, &[SqlParam::Int(order_id)])?;
            }
            Generator::BufferBusyWaits { worker_id } => {
                let hot_row = rng.gen_range(1..=HOT_ROWS);
                conn.execute(
                    sql::HOT_ROW_UPDATE,
                    &[SqlParam::Int(worker_id as i64), SqlParam::Int(hot_row)],
                )?;
                conn.commit()?;
            }
        }
        Ok(())
    }
}

pub fn enabled_generators(cfg: &GeneratorsConfig) -> Vec<Generator> {
    let flagged = [
        (cfg.cpu_intensive, Generator::CpuIntensive),
        (cfg.io_intensive, Generator::IoIntensive),
        (cfg.enqueue_waits, Generator::EnqueueWaits),
        (cfg.latch_waits, Generator::LatchWaits),
        (cfg.log_file_waits, Generator::LogFileWaits),
        (cfg.direct_path_reads, Generator::DirectPathReads),
        (cfg.db_file_sequential_reads, Generator::DbFileSequentialReads),
    ];
    flagged
        .into_iter()
        .filter_map(|(enabled, generator)| enabled.then_some(generator))
        .chain((0..cfg.buffer_busy_workers).map(|worker_id| Generator::BufferBusyWaits { worker_id }))
        .collect()
}

/// Connect, execute, sleep, repeat until shutdown. A failed iteration is
/// logged and followed by the same pause.
pub fn run_continuous(ctx: &LoadContext, generator: Generator) {
    let mut rng = StdRng::from_entropy();
    let name = generator.name();
    info!(generator = name, "generator_started");

    while !ctx.shutdown.is_triggered() {
        match generator.step(ctx, &mut rng) {
            Ok(()) => debug!(generator = name, "iteration_done"),
            Err(e) => {
                if !ctx.shutdown.is_triggered() {
                    report_error(name, &e, &ctx.metrics);
                }
            }
        }
        if !ctx.shutdown.sleep(generator.interval()) {
            break;
        }
    }

    info!(generator = name, "generator_stopped");
}

/// One blocker session holds row locks while a handful of others queue
/// behind it, producing `enq: TX - row lock contention`.
#[derive(Debug, Clone)]
pub struct LockContention {
    pub start_delay: Duration,
    pub hold: Duration,
    pub blocked_sessions: usize,
    pub blocked_call_timeout: Duration,
}

impl Default for LockContention {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(2),
            hold: Duration::from_secs(20),
            blocked_sessions: 5,
            blocked_call_timeout: Duration::from_secs(30),
        }
    }
}

impl LockContention {
    pub fn run(&self, ctx: &Arc<LoadContext>, pool: &WorkerPool) {
        if let Err(e) = self.hold_locks(ctx, pool) {
            if !ctx.shutdown.is_triggered() {
                report_error("lock_contention", &e, &ctx.metrics);
            }
        }
    }

    fn hold_locks(&self, ctx: &Arc<LoadContext>, pool: &WorkerPool) -> Result<()> {
        if !ctx.shutdown.sleep(self.start_delay) {
            return Ok(());
        }

        let mut blocker = ctx.connect()?;
        let locked = blocker.execute(sql::BLOCKER_UPDATE, &[])?;
        info!(rows = locked, "blocker_holding_locks");

        let opened = self.open_blocked_sessions(ctx, pool);
        if opened.is_ok() {
            ctx.shutdown.sleep(self.hold);
        }

        blocker.rollback()?;
        info!("blocker_released_locks");
        opened
    }

    fn open_blocked_sessions(&self, ctx: &Arc<LoadContext>, pool: &WorkerPool) -> Result<()> {
        for session_id in 0..self.blocked_sessions {
            let mut blocked = ctx.connect()?;
            blocked.set_call_timeout(Some(self.blocked_call_timeout))?;

            let job_ctx = Arc::clone(ctx);
            pool.submit("blocked_session", move || {
                wait_on_locks(&job_ctx, blocked, session_id);
            });
        }
        Ok(())
    }
}

fn wait_on_locks(ctx: &LoadContext, mut session: MeteredSession, session_id: usize) {
    info!(session_id, "blocked_session_waiting");

    let result = session
        .execute(sql::BLOCKED_UPDATE, &[])
        .and_then(|_| session.commit());
    match result {
        Ok(()) => info!(session_id, "blocked_session_acquired_lock"),
        Err(e) => {
            // A call timeout here is the expected outcome
            let kind = db::classify(&e);
            ctx.metrics.record_error(kind);
            info!(session_id, kind = ?kind, error = %e, "blocked_session_wait_ended");
        }
    }
}

/// Tasks submitted together every burst interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    TablespacePressure,
    TempSpaceUsage,
    UndoSegmentContention,
    LibraryCacheContention,
    RowCacheContention,
    CheckpointActivity,
    ArchiveLogActivity,
    ParseActivity,
    SqlNetActivity,
    IndexContention,
}

impl Burst {
    pub const ALL: [Burst; 10] = [
        Burst::TablespacePressure,
        Burst::TempSpaceUsage,
        Burst::UndoSegmentContention,
        Burst::LibraryCacheContention,
        Burst::RowCacheContention,
        Burst::CheckpointActivity,
        Burst::ArchiveLogActivity,
        Burst::ParseActivity,
        Burst::SqlNetActivity,
        Burst::IndexContention,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Burst::TablespacePressure => "tablespace_pressure",
            Burst::TempSpaceUsage => "temp_space_usage",
            Burst::UndoSegmentContention => "undo_segment_contention",
            Burst::LibraryCacheContention => "library_cache_contention",
            Burst::RowCacheContention => "row_cache_contention",
            Burst::CheckpointActivity => "checkpoint_activity",
            Burst::ArchiveLogActivity => "archive_log_activity",
            Burst::ParseActivity => "parse_activity",
            Burst::SqlNetActivity => "sqlnet_activity",
            Burst::IndexContention => "index_contention",
        }
    }

    fn run(&self, ctx: &LoadContext, rng: &mut StdRng) -> Result<()> {
        let mut conn = ctx.connect()?;
        match self {
            Burst::TablespacePressure => {
                conn.execute(sql::TABLESPACE_FILL, &[])?;
                conn.commit()?;
            }
            Burst::TempSpaceUsage => {
                conn.query(sql::TEMP_SPACE_JOIN, &[])?;
            }
            Burst::UndoSegmentContention => {
                conn.execute(&sql::undo_update(rng.gen_range(0..100)), &[])?;
                ctx.shutdown.sleep(UNDO_HOLD);
                conn.rollback()?;
            }
            Burst::LibraryCacheContention => {
                for _ in 0..LIBRARY_CACHE_STATEMENTS {
                    let text = sql::literal_count(rng.gen_range(0..1000), rng.gen_range(0..10));
                    conn.query(&text, &[])?;
                }
            }
            Burst::RowCacheContention => {
                for _ in 0..ROW_CACHE_LOOKUPS {
                    conn.query(sql::DICTIONARY_LOOKUP, &[])?;
                }
            }
            Burst::CheckpointActivity => {
                conn.execute(sql::CHECKPOINT_INSERT, &[])?;
                conn.commit()?;
                conn.execute(sql::CHECKPOINT_UPDATE, &[])?;
                conn.commit()?;
            }
            Burst::ArchiveLogActivity => {
                for _ in 0..ARCHIVE_LOG_BATCHES {
                    conn.execute(sql::ARCHIVE_LOG_INSERT, &[])?;
                    conn.commit()?;
                }
            }
            Burst::ParseActivity => {
                let marker = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or_default();
                for seq in 0..HARD_PARSES {
                    let order_id = rng.gen_range(1..=ctx.max_order_id);
                    conn.query(&sql::unique_parse(marker, seq), &[SqlParam::Int(order_id)])?;
                }
            }
            Burst::SqlNetActivity => {
                for _ in 0..SQLNET_ROUND_TRIPS {
                    let order_id = rng.gen_range(1..=ctx.max_order_id);
                    conn.query_columns(sql::ROUND_TRIP_LOOKUP, &[SqlParam::Int(order_id)])?;
                }
            }
            Burst::IndexContention => {
                let rows: Vec<Vec<SqlParam>> = (0..INDEX_CONTENTION_ROWS)
                    .map(|_| {
                        vec![
                            SqlParam::Int(rng.gen_range(1..=100)),
                            SqlParam::Int(rng.gen_range(1..=50)),
                            SqlParam::Float(rng.r#gen::<f64>() * MAX_AMOUNT),
                        ]
                    })
                    .collect();
                let mut offset = 0;
                for size in batch_chunk_sizes(rows.len(), INDEX_CONTENTION_FLUSH_EVERY) {
                    conn.execute_batch(sql::INDEX_CONTENTION_INSERT, &rows[offset..offset + size])?;
                    offset += size;
                }
                conn.commit()?;
            }
        }
        Ok(())
    }
}

/// Array-DML flush sizes: a flush right after row 0 and every
/// `flush_every` rows after it, then whatever is left.
fn batch_chunk_sizes(total: usize, flush_every: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut pending = 0;
    for i in 0..total {
        pending += 1;
        if i % flush_every == 0 {
            sizes.push(pending);
            pending = 0;
        }
    }
    if pending > 0 {
        sizes.push(pending);
    }
    sizes
}

pub fn run_burst(ctx: &LoadContext, burst: Burst) {
    if ctx.shutdown.is_triggered() {
        return;
    }
    let mut rng = StdRng::from_entropy();
    match burst.run(ctx, &mut rng) {
        Ok(()) => info!(burst = burst.name(), "burst_task_done"),
        Err(e) => {
            if !ctx.shutdown.is_triggered() {
                report_error(burst.name(), &e, &ctx.metrics);
            }
        }
    }
}

/// Submits every [`Burst`] task once per `interval` until shutdown.
pub async fn burst_scheduler(ctx: Arc<LoadContext>, pool: Arc<WorkerPool>, interval: Duration) {
    info!(interval_secs = interval.as_secs_f64(), "burst_scheduler_started");

    while ctx.shutdown.sleep_async(interval).await {
        ctx.metrics.record_burst();
        for burst in Burst::ALL {
            let job_ctx = Arc::clone(&ctx);
            pool.submit(burst.name(), move || run_burst(&job_ctx, burst));
        }
        info!(tasks = Burst::ALL.len(), running = pool.running(), "burst_triggered");
    }
}

/// Submits every enabled generator to the pool. Returns the burst
/// scheduler task, if bursts are enabled.
pub fn start_generators(
    cfg: &GeneratorsConfig,
    ctx: &Arc<LoadContext>,
    pool: &Arc<WorkerPool>,
) -> Option<JoinHandle<()>> {
    let generators = enabled_generators(cfg);
    for generator in &generators {
        let job_ctx = Arc::clone(ctx);
        let generator = *generator;
        pool.submit(generator.name(), move || run_continuous(&job_ctx, generator));
    }

    if cfg.lock_contention {
        let job_ctx = Arc::clone(ctx);
        let job_pool = Arc::clone(pool);
        pool.submit("lock_contention", move || {
            LockContention::default().run(&job_ctx, &job_pool);
        });
    }

    let scheduler = cfg.bursts.then(|| {
        tokio::spawn(burst_scheduler(
            Arc::clone(ctx),
            Arc::clone(pool),
            Duration::from_secs(cfg.burst_interval_secs.max(1)),
        ))
    });

    info!(
        continuous = generators.len(),
        lock_contention = cfg.lock_contention,
        bursts = cfg.bursts,
        pool_size = pool.size(),
        "generators_started"
    );
    scheduler
}
