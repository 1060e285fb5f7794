use serde::{Deserialize, Serialize};

/// Default number of tasks allowed to stream at once.
pub const BATCH_CONCURRENCY: usize = 5;

/// Default wall-clock budget for one send, in milliseconds.
pub const GENERATION_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub app: AppModeConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "genbatch_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Which request protocol the target app speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    #[default]
    Completion,
    Workflow,
}

impl AppMode {
    pub fn is_workflow(self) -> bool {
        matches!(self, AppMode::Workflow)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppModeConfig {
    #[serde(default)]
    pub mode: AppMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Upper bound on simultaneously running tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Column label used for the result cell of export rows.
    #[serde(default = "default_result_column")]
    pub result_column: String,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_concurrency() -> usize {
    BATCH_CONCURRENCY
}

fn default_result_column() -> String {
    "Result".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            result_column: default_result_column(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl BatchConfig {
    /// Concurrency window actually used by the scheduler (never zero).
    pub fn window(&self) -> usize {
        self.concurrency.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    GENERATION_TIMEOUT_MS
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TransportConfig {
    #[serde(rename = "http")]
    Http(HttpTransportConfig),
    #[serde(rename = "replay")]
    Replay(ReplayTransportConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Http(HttpTransportConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Connect/request timeout for non-streaming calls (stop, feedback).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// End-user identifier forwarded with every request.
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_base_url() -> String {
    "http://localhost/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_user() -> String {
    "genbatch".to_string()
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            user: default_user(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplayTransportConfig {
    /// JSONL file of recorded stream payloads.
    pub script: String,

    /// Delay between replayed events.
    #[serde(default)]
    pub delay_ms: u64,
}
