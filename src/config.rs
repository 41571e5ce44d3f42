use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{PlugflowError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// number of async worker threads, range [1, 32768), defaults to 16
    pub async_worker_thread_number: u16,
    /// engine config
    pub engine: EngineConfig,
    /// worker pool config
    pub pool: PoolConfig,
    /// job queue config
    pub queue: QueueConfig,
    /// status tracker config
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// root directory holding one sub directory per plugin slug
    pub plugins_dir: PathBuf,
    /// where entrypoint outputs are materialized
    pub temp_dir: PathBuf,
    /// upper bound for a single entrypoint run
    pub entrypoint_timeout_ms: u64,
    /// object storage bucket for exposure payloads
    pub storage_bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// hard cap on live workers
    pub max_concurrent_jobs: usize,
    /// floor kept alive even when idle
    pub min_workers: usize,
    /// idle time before a worker above the floor is removed
    pub idle_worker_ttl_ms: u64,
    /// crashes further apart than this do not count as a loop
    pub crash_window_ms: u64,
    /// consecutive crashes that flip the pool into crash-loop state
    pub max_consecutive_crashes: u32,
    /// base respawn delay while in a crash loop
    pub crash_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// name used for status keys (`{queue_type}:status:{job_id}`)
    pub queue_type: String,
    /// jobs dispatched per loop turn
    pub batch_size: usize,
    /// sleep between loop turns when nothing can be dispatched
    pub poll_interval_ms: u64,
    /// attempts before a job is marked failed
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub ttl_seconds: u64,
    /// every queue type whose records are read when grouping
    pub queue_types: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_worker_thread_number: 16,
            engine: EngineConfig::default(),
            pool: PoolConfig::default(),
            queue: QueueConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            temp_dir: std::env::temp_dir(),
            entrypoint_timeout_ms: 30 * 60 * 1000,
            storage_bucket: "plugins".to_string(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            min_workers: 1,
            idle_worker_ttl_ms: 30_000,
            crash_window_ms: 60_000,
            max_consecutive_crashes: 3,
            crash_backoff_ms: 1_000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_type: "analysis".to_string(),
            batch_size: 10,
            poll_interval_ms: 100,
            max_retries: 1,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 86_400,
            queue_types: ["trajectory_processing", "rasterizer", "analysis", "ssh-import", "cloud-upload"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    pub fn entrypoint_timeout(&self) -> Duration {
        Duration::from_millis(self.entrypoint_timeout_ms)
    }
}

impl PoolConfig {
    pub fn idle_worker_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_worker_ttl_ms)
    }

    pub fn crash_window(&self) -> Duration {
        Duration::from_millis(self.crash_window_ms)
    }

    pub fn crash_backoff(&self) -> Duration {
        Duration::from_millis(self.crash_backoff_ms)
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| PlugflowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.async_worker_thread_number == 0 {
            return Err(PlugflowError::Config("async_worker_thread_number must be at least 1".to_string()));
        }
        if self.pool.max_concurrent_jobs == 0 {
            return Err(PlugflowError::Config("pool.max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.pool.min_workers > self.pool.max_concurrent_jobs {
            return Err(PlugflowError::Config(format!(
                "pool.min_workers ({}) exceeds pool.max_concurrent_jobs ({})",
                self.pool.min_workers, self.pool.max_concurrent_jobs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::Config;

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
        async_worker_thread_number = 10
        [engine]
        plugins_dir = "/opt/plugins"
        entrypoint_timeout_ms = 5000

        [pool]
        max_concurrent_jobs = 8
        min_workers = 2

        [queue]
        queue_type = "trajectory_processing"
        "#;
        let config = Config::load_from_str(toml_str).unwrap();
        assert_eq!(config.async_worker_thread_number, 10);
        assert_eq!(config.engine.plugins_dir.to_str(), Some("/opt/plugins"));
        assert_eq!(config.engine.entrypoint_timeout().as_millis(), 5000);
        assert_eq!(config.engine.storage_bucket, "plugins");
        assert_eq!(config.pool.max_concurrent_jobs, 8);
        assert_eq!(config.pool.min_workers, 2);
        assert_eq!(config.pool.max_consecutive_crashes, 3);
        assert_eq!(config.queue.queue_type, "trajectory_processing");
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.status.ttl_seconds, 86_400);
        assert_eq!(config.status.queue_types.len(), 5);
    }

    #[test]
    fn test_config_empty_uses_defaults() {
        let config = Config::load_from_str("").unwrap();
        assert_eq!(config.async_worker_thread_number, 16);
        assert_eq!(config.pool.idle_worker_ttl_ms, 30_000);
        assert_eq!(config.pool.crash_window_ms, 60_000);
        assert_eq!(config.queue.max_retries, 1);
    }

    #[test]
    fn test_config_rejects_inverted_pool_bounds() {
        let toml_str = r#"
        [pool]
        max_concurrent_jobs = 2
        min_workers = 3
        "#;
        assert!(Config::load_from_str(toml_str).is_err());
    }

    #[test]
    fn test_config_bad_toml() {
        assert!(Config::load_from_str("[pool").is_err());
    }
}
