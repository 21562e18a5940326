use anyhow::{Context, anyhow};
use serde::Deserialize;

pub const CONNECT_STRING_VAR: &str = "ORACLE_CONNECT_STRING";
pub const USERNAME_VAR: &str = "ORACLE_USERNAME";
pub const PASSWORD_VAR: &str = "ORACLE_PASSWORD";
pub const LOAD_PROFILE_VAR: &str = "LOAD_PROFILE";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connect_string: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 32,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SetupConfig {
    pub enabled: bool,
    pub seed_orders: u32,
    pub seed_lock_targets: u32,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed_orders: 50_000,
            seed_lock_targets: 100,
        }
    }
}

/// Which generators get submitted to the pool at startup.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GeneratorsConfig {
    pub cpu_intensive: bool,
    pub io_intensive: bool,
    pub lock_contention: bool,
    pub enqueue_waits: bool,
    pub latch_waits: bool,
    pub log_file_waits: bool,
    pub direct_path_reads: bool,
    pub db_file_sequential_reads: bool,
    pub buffer_busy_workers: usize,
    pub bursts: bool,
    pub burst_interval_secs: u64,
}

impl Default for GeneratorsConfig {
    fn default() -> Self {
        Self {
            cpu_intensive: true,
            io_intensive: true,
            lock_contention: true,
            enqueue_waits: true,
            latch_waits: true,
            log_file_waits: true,
            direct_path_reads: true,
            db_file_sequential_reads: true,
            buffer_busy_workers: 10,
            bursts: true,
            burst_interval_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub generators: GeneratorsConfig,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    pub runtime_threads: Option<usize>,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        // A missing .env is fine, credentials may already be exported
        dotenvy::dotenv().ok();

        let s = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        Self::from_toml_str(&s, |key| std::env::var(key).ok())
    }

    /// Parses the file contents and merges the environment on top of them.
    pub fn from_toml_str(
        s: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut cfg: Config = toml::from_str(s)?;

        if let Some(v) = lookup(CONNECT_STRING_VAR) {
            cfg.database.connect_string = v;
        }
        if let Some(v) = lookup(USERNAME_VAR) {
            cfg.database.username = v;
        }
        if let Some(v) = lookup(PASSWORD_VAR) {
            cfg.database.password = v;
        }

        // Example: LOAD_PROFILE='lock_contention = false, buffer_busy_workers = 4'
        if let Some(profile) = lookup(LOAD_PROFILE_VAR) {
            cfg = Self::apply_load_profile_override(cfg, &profile)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_load_profile_override(mut cfg: Config, profile_str: &str) -> anyhow::Result<Self> {
        let normalized = profile_str.replace(", ", "\n").replace(',', "\n");

        let generators: GeneratorsConfig = toml::from_str(&normalized).map_err(|e| {
            anyhow!(
                "Failed to parse {LOAD_PROFILE_VAR} environment variable: {e}. Expected format: 'cpu_intensive = true, lock_contention = false, buffer_busy_workers = 4'"
            )
        })?;

        // Use eprintln since tracing not initialized yet
        eprintln!("{LOAD_PROFILE_VAR} environment variable detected - overriding [generators]");

        cfg.generators = generators;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let missing: Vec<&str> = [
            (CONNECT_STRING_VAR, &self.database.connect_string),
            (USERNAME_VAR, &self.database.username),
            (PASSWORD_VAR, &self.database.password),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(anyhow!(
                "missing database credentials: set {} in config.toml [database] or the environment (.env)",
                missing.join(", ")
            ));
        }

        if self.pool.size == 0 {
            return Err(anyhow!("pool.size must be at least 1"));
        }

        Ok(())
    }
}
