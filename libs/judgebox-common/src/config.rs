use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which backend the worker runs submissions on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionBackend {
    Docker,
    /// Plain child processes. No memory, CPU, pid or network isolation.
    Local,
}

impl FromStr for ExecutionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(ExecutionBackend::Docker),
            "local" => Ok(ExecutionBackend::Local),
            other => Err(format!("unknown execution backend: {}", other)),
        }
    }
}

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub queue_name: String,
    pub status_channel: String,
    pub status_ttl_secs: u64,
    pub dequeue_timeout_secs: u64,
    pub queue_retry_delay_ms: u64,
    pub execution_timeout_ms: u64,
    pub image_pull_timeout_ms: u64,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub pids_limit: i64,
    pub max_concurrent_containers: usize,
    pub max_output_bytes: usize,
    pub docker_socket: Option<String>,
    pub prewarm_images: bool,
    pub execution_backend: ExecutionBackend,
    pub api_port: u16,
    pub worker_port: u16,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            queue_name: env::var("QUEUE_NAME")
                .unwrap_or_else(|_| crate::redis::DEFAULT_QUEUE.to_string()),
            status_channel: env::var("STATUS_CHANNEL")
                .unwrap_or_else(|_| crate::redis::DEFAULT_STATUS_CHANNEL.to_string()),
            status_ttl_secs: parsed("STATUS_TTL_SECS", 24 * 60 * 60),
            dequeue_timeout_secs: parsed("DEQUEUE_TIMEOUT_SECS", 5),
            queue_retry_delay_ms: parsed("QUEUE_RETRY_DELAY_MS", 1000),
            execution_timeout_ms: parsed("EXECUTION_TIMEOUT_MS", 60_000),
            image_pull_timeout_ms: parsed("IMAGE_PULL_TIMEOUT_MS", 120_000),
            memory_limit_mb: parsed("MEMORY_LIMIT_MB", 256),
            cpu_limit: parsed("CPU_LIMIT", 0.5),
            pids_limit: parsed("PIDS_LIMIT", 50),
            max_concurrent_containers: parsed("MAX_CONCURRENT_CONTAINERS", 4).max(1),
            max_output_bytes: parsed("MAX_OUTPUT_BYTES", 64 * 1024),
            docker_socket: env::var("DOCKER_SOCKET").ok().filter(|s| !s.is_empty()),
            prewarm_images: parsed("PREWARM_IMAGES", false),
            execution_backend: parsed("EXECUTION_BACKEND", ExecutionBackend::Docker),
            api_port: parsed("API_PORT", 3000),
            worker_port: parsed("WORKER_PORT", 3001),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    pub fn queue_retry_delay(&self) -> Duration {
        Duration::from_millis(self.queue_retry_delay_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn image_pull_timeout(&self) -> Duration {
        Duration::from_millis(self.image_pull_timeout_ms)
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    /// CPU ceiling in the runtime's nano-CPU unit
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
