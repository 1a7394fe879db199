//! Gateway configuration.
//!
//! One JSON file with a section per concern. Every field has a default,
//! so an empty object is a valid config. Secrets are never stored here:
//! the file names the environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::calendar::google::GOOGLE_CALENDAR_API_BASE;
use crate::calendar::{RetryPolicy, WorkWindow};
use crate::dialogue::DialogueSettings;
use crate::error::ConfigError;
use crate::gateway::session::SessionStoreConfig;
use crate::nlu::gemini::GEMINI_API_BASE;

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Language understanding
    #[serde(default)]
    pub nlu: NluConfig,

    /// Calendar service
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Conversation tunables
    #[serde(default)]
    pub dialogue: DialogueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time before a session is dropped
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,

    /// Maximum live sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Period of the expiry sweep
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

/// Which NLU provider to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NluProviderKind {
    Gemini,
    /// Deterministic fallback extraction only
    None,
}

/// NLU configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    #[serde(default = "default_nlu_provider")]
    pub provider: NluProviderKind,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_nlu_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Newest transcript turns sent per request
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

/// Which calendar service to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarBackendKind {
    Google,
    Memory,
}

/// Calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_backend")]
    pub backend: CalendarBackendKind,

    /// Calendar used when a request names none
    #[serde(default = "default_calendar_id")]
    pub default_calendar_id: String,

    #[serde(default = "default_calendar_api_base")]
    pub api_base: String,

    /// Environment variable holding the OAuth access token
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Events shown by "show my meetings"
    #[serde(default = "default_upcoming_limit")]
    pub upcoming_limit: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retries for read-only calendar calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Dialogue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    #[serde(default = "default_work_day_start")]
    pub work_day_start_hour: u32,

    #[serde(default = "default_work_day_end")]
    pub work_day_end_hour: u32,

    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: i64,

    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,

    #[serde(default = "default_inline_suggestions")]
    pub inline_suggestions: usize,

    #[serde(default = "default_summary")]
    pub default_summary: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON logging format
    #[serde(default)]
    pub json_format: bool,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_session_ttl() -> u64 {
    3600 // 1 hour
}

fn default_max_sessions() -> usize {
    1000
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_nlu_provider() -> NluProviderKind {
    NluProviderKind::Gemini
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_nlu_api_base() -> String {
    GEMINI_API_BASE.to_string()
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_history_turns() -> usize {
    20
}

fn default_calendar_backend() -> CalendarBackendKind {
    CalendarBackendKind::Google
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_calendar_api_base() -> String {
    GOOGLE_CALENDAR_API_BASE.to_string()
}

fn default_access_token_env() -> String {
    "GOOGLE_CALENDAR_TOKEN".to_string()
}

fn default_upcoming_limit() -> usize {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_work_day_start() -> u32 {
    9
}

fn default_work_day_end() -> u32 {
    18
}

fn default_slot_minutes() -> i64 {
    60
}

fn default_max_suggestions() -> usize {
    5
}

fn default_inline_suggestions() -> usize {
    3
}

fn default_summary() -> String {
    crate::types::DEFAULT_SUMMARY.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_true(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            max_sessions: default_max_sessions(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            provider: default_nlu_provider(),
            model: default_model(),
            api_base: default_nlu_api_base(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_timeout_ms(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            backend: default_calendar_backend(),
            default_calendar_id: default_calendar_id(),
            api_base: default_calendar_api_base(),
            access_token_env: default_access_token_env(),
            timeout_ms: default_timeout_ms(),
            upcoming_limit: default_upcoming_limit(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: default_max_retries() }
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            work_day_start_hour: default_work_day_start(),
            work_day_end_hour: default_work_day_end(),
            slot_minutes: default_slot_minutes(),
            max_suggestions: default_max_suggestions(),
            inline_suggestions: default_inline_suggestions(),
            default_summary: default_summary(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl GatewayConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load `path`, or fall back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(&path) {
            Err(ConfigError::FileNotFound(p)) => {
                tracing::debug!(path = %p, "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Save configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Note: port 0 is valid - it means "let the OS assign a port"
        let d = &self.dialogue;
        if d.work_day_start_hour > 23 {
            return Err(invalid("dialogue.work_day_start_hour", "must be between 0 and 23"));
        }
        if d.work_day_end_hour > 24 {
            return Err(invalid("dialogue.work_day_end_hour", "must be between 1 and 24"));
        }
        if d.work_day_end_hour <= d.work_day_start_hour {
            return Err(invalid("dialogue.work_day_end_hour", "must be after work_day_start_hour"));
        }
        if d.slot_minutes <= 0 {
            return Err(invalid("dialogue.slot_minutes", "must be positive"));
        }
        if d.slot_minutes > i64::from(d.work_day_end_hour - d.work_day_start_hour) * 60 {
            return Err(invalid("dialogue.slot_minutes", "must fit inside the working day"));
        }
        if d.max_suggestions == 0 {
            return Err(invalid("dialogue.max_suggestions", "must be at least 1"));
        }
        if d.default_summary.trim().is_empty() {
            return Err(invalid("dialogue.default_summary", "must not be empty"));
        }

        if self.session.max_sessions == 0 {
            return Err(invalid("session.max_sessions", "must be at least 1"));
        }
        if self.session.ttl_seconds == 0 {
            return Err(invalid("session.ttl_seconds", "must be positive"));
        }
        if self.session.cleanup_interval_seconds == 0 {
            return Err(invalid("session.cleanup_interval_seconds", "must be positive"));
        }

        if self.nlu.timeout_ms == 0 {
            return Err(invalid("nlu.timeout_ms", "must be positive"));
        }
        if self.nlu.max_history_turns == 0 {
            return Err(invalid("nlu.max_history_turns", "must be at least 1"));
        }
        if self.calendar.timeout_ms == 0 {
            return Err(invalid("calendar.timeout_ms", "must be positive"));
        }
        if self.calendar.upcoming_limit == 0 {
            return Err(invalid("calendar.upcoming_limit", "must be at least 1"));
        }
        if self.calendar.default_calendar_id.trim().is_empty() {
            return Err(invalid("calendar.default_calendar_id", "must not be empty"));
        }

        Ok(())
    }

    /// Get the server address string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn session_store_config(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            ttl: Duration::from_secs(self.session.ttl_seconds),
            max_sessions: self.session.max_sessions,
        }
    }

    pub fn dialogue_settings(&self) -> DialogueSettings {
        let d = &self.dialogue;
        DialogueSettings {
            window: WorkWindow {
                start_hour: d.work_day_start_hour,
                end_hour: d.work_day_end_hour,
            },
            slot_length: chrono::Duration::minutes(d.slot_minutes),
            max_suggestions: d.max_suggestions,
            inline_suggestions: d.inline_suggestions,
            upcoming_limit: self.calendar.upcoming_limit,
            default_summary: d.default_summary.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.calendar.retry.max_retries)
    }

    /// Create a configuration for testing: offline backends, OS-assigned port.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.server.port = 0;
        config.nlu.provider = NluProviderKind::None;
        config.nlu.timeout_ms = 1_000;
        config.calendar.backend = CalendarBackendKind::Memory;
        config.calendar.timeout_ms = 1_000;
        config
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
