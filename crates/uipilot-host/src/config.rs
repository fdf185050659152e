use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: usize = 8;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_REQUEST_BYTES: usize = 1_048_576; // 1MB

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub app_version: String,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub max_request_bytes: usize,
    /// Overrides the pid-derived socket path. Mainly for tests.
    pub socket_path: Option<PathBuf>,
    /// When set, the host shuts the application down if this process dies.
    pub parent_pid: Option<u32>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            max_connections: env::var("UIPILOT_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            idle_timeout: Duration::from_secs(
                env::var("UIPILOT_IDLE_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
            max_request_bytes: env::var("UIPILOT_MAX_REQUEST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
            socket_path: None,
            parent_pid: None,
        }
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_request_bytes(mut self, max: usize) -> Self {
        self.max_request_bytes = max;
        self
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn with_parent_pid(mut self, pid: u32) -> Self {
        self.parent_pid = Some(pid);
        self
    }
}
