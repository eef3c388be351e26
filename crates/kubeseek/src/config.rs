//! Monitor and server configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Only namespaces whose names start with this are probed.
pub const DEFAULT_NAMESPACE_PREFIX: &str = "client";

/// Seconds between the end of one cycle and the start of the next.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Lines read from the end of each log.
pub const DEFAULT_LOG_TAIL_LINES: u32 = 100;

/// Fan-out units in flight per stage.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Deadline for a single cluster query.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Log file read inside application containers.
pub const DEFAULT_APPLICATION_LOG_PATH: &str = "/home/faraday/.faraday/logs/celery.log";

/// Address the HTTP server binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5001";

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Namespace name prefix to probe and inspect
    pub namespace_prefix: String,
    /// Sleep between cycles
    pub poll_interval: Duration,
    /// Lines fetched from the end of each log
    pub log_tail_lines: u32,
    /// Max fan-out units in flight per stage
    pub concurrency: usize,
    /// Deadline for each cluster query
    pub query_timeout: Duration,
    /// Optional deadline for each probe or pod inspection
    pub task_timeout: Option<Duration>,
    /// Optional deadline for a whole cycle
    pub cycle_timeout: Option<Duration>,
    /// Absolute path of the application log inside containers
    pub application_log_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            concurrency: DEFAULT_CONCURRENCY,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            task_timeout: None,
            cycle_timeout: None,
            application_log_path: DEFAULT_APPLICATION_LOG_PATH.to_string(),
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn with_namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_log_tail_lines(mut self, lines: u32) -> Self {
        self.log_tail_lines = lines;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cycle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_application_log_path(mut self, path: impl Into<String>) -> Self {
        self.application_log_path = path.into();
        self
    }

    /// Whether a namespace falls under the configured prefix.
    #[must_use]
    pub fn watches_namespace(&self, namespace: &str) -> bool {
        namespace.starts_with(&self.namespace_prefix)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.log_tail_lines == 0 {
            return Err(ConfigError::ZeroTailLines);
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("query"));
        }
        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout("task"));
        }
        if self.cycle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout("cycle"));
        }
        if !Path::new(&self.application_log_path).is_absolute() {
            return Err(ConfigError::RelativeLogPath(
                self.application_log_path.clone(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
        }
    }
}
