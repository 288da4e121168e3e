//! Configuration management for the showtime bot.
//!
//! The service reads a single file at `~/.showtime/config.json`. Every section
//! is optional and falls back to its defaults.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (SHOWTIME_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `SHOWTIME_LOG_LEVEL` → observability.log_level
//! - `SHOWTIME_LOG_FORMAT` → observability.log_format
//! - `SHOWTIME_CATALOG_URL` → catalog.listings_url
//! - `SHOWTIME_DETAILS_URL` → catalog.details_url
//! - `SHOWTIME_LLM_BASE_URL` → llm.base_url
//! - `SHOWTIME_LLM_MODEL` → llm.model
//! - `SHOWTIME_MAX_RECONNECTS` → session.max_reconnect_attempts
//! - `OPENAI_API_KEY` / `SHOWTIME_LLM_API_KEY` → llm.api_key

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".showtime"),
        |dirs| dirs.home_dir().join(".showtime"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SHOWTIME_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("SHOWTIME_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(url) = std::env::var("SHOWTIME_CATALOG_URL") {
            self.catalog.listings_url = Some(url);
        }
        if let Ok(url) = std::env::var("SHOWTIME_DETAILS_URL") {
            self.catalog.details_url = Some(url);
        }
        if let Ok(url) = std::env::var("SHOWTIME_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("SHOWTIME_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(max) = std::env::var("SHOWTIME_MAX_RECONNECTS") {
            if let Ok(n) = max.parse() {
                self.session.max_reconnect_attempts = n;
            }
        }

        // Explicit service key wins over the generic provider variable
        if let Ok(key) = std::env::var("SHOWTIME_LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            self.llm.api_key = Some(key);
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let path = config_path();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to hold at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Messaging session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Consecutive reconnect attempts before the session is parked in `Failed`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Spacing unit between reconnect attempts (attempt n waits n * interval).
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// How long a parked session waits before the attempt counter resets.
    #[serde(default = "default_reconnect_cooldown_secs")]
    pub reconnect_cooldown_secs: u64,

    /// Liveness probe period while `Ready`.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Deadline for a single liveness probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Deadline for establishing a transport connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Pre-fetch the catalog as soon as the session becomes ready.
    #[serde(default = "default_true")]
    pub prewarm_catalog: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            reconnect_cooldown_secs: default_reconnect_cooldown_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            prewarm_catalog: true,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ============================================================================
// Caches
// ============================================================================

/// Catalog and detail cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Catalog listing TTL.
    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,

    /// Movie detail TTL (slow-changing metadata).
    #[serde(default = "default_detail_ttl_secs")]
    pub detail_ttl_secs: u64,

    /// Maximum number of detail entries held at once.
    #[serde(default = "default_detail_capacity")]
    pub detail_capacity: usize,

    /// Sweep period for the detail cache.
    #[serde(default = "default_detail_sweep_secs")]
    pub detail_sweep_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            catalog_ttl_secs: default_catalog_ttl_secs(),
            detail_ttl_secs: default_detail_ttl_secs(),
            detail_capacity: default_detail_capacity(),
            detail_sweep_secs: default_detail_sweep_secs(),
        }
    }
}

impl CacheConfig {
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }

    pub fn detail_ttl(&self) -> Duration {
        Duration::from_secs(self.detail_ttl_secs)
    }

    pub fn detail_sweep_period(&self) -> Duration {
        Duration::from_secs(self.detail_sweep_secs)
    }
}

// ============================================================================
// Conversation memory
// ============================================================================

/// Per-identity conversation memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum user/assistant pairs retained per identity.
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,

    /// Idle window after which a conversation is forgotten.
    #[serde(default = "default_idle_expiry_secs")]
    pub idle_expiry_secs: u64,

    /// Sweep period for idle conversations.
    #[serde(default = "default_conversation_sweep_secs")]
    pub sweep_secs: u64,

    /// Hard ceiling on concurrently tracked identities.
    #[serde(default = "default_max_identities")]
    pub max_identities: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_pairs: default_max_pairs(),
            idle_expiry_secs: default_idle_expiry_secs(),
            sweep_secs: default_conversation_sweep_secs(),
            max_identities: default_max_identities(),
        }
    }
}

impl ConversationConfig {
    pub fn idle_expiry(&self) -> Duration {
        Duration::from_secs(self.idle_expiry_secs)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Backoff settings for calls to unreliable upstreams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each later attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Deadline for a single upstream call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Upstream catalog endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// URL returning the JSON array of showtimes.
    #[serde(default)]
    pub listings_url: Option<String>,

    /// URL queried with `?title=` for movie details.
    #[serde(default)]
    pub details_url: Option<String>,

    /// Venue UTC offset in hours, used to drop showtimes already started.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Maximum listings rendered into a prompt.
    #[serde(default = "default_max_listings")]
    pub max_listings: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            listings_url: None,
            details_url: None,
            utc_offset_hours: default_utc_offset_hours(),
            max_listings: default_max_listings(),
        }
    }
}

// ============================================================================
// LLM
// ============================================================================

/// Text generation backend (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Overrides the built-in system instructions.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Inbound message dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long an identity's lane stays alive without traffic.
    #[serde(default = "default_lane_idle_secs")]
    pub lane_idle_secs: u64,

    /// Capacity of the inbound event channel.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    /// Messages queued per identity before new ones are dropped.
    #[serde(default = "default_lane_queue_depth")]
    pub lane_queue_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            lane_idle_secs: default_lane_idle_secs(),
            inbound_buffer: default_inbound_buffer(),
            lane_queue_depth: default_lane_queue_depth(),
        }
    }
}

impl DispatchConfig {
    pub fn lane_idle(&self) -> Duration {
        Duration::from_secs(self.lane_idle_secs)
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// One-shot refresh jobs registered at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub jobs: Vec<ScheduledJobConfig>,
}

/// A refresh job as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJobConfig {
    pub id: String,

    /// RFC 3339 timestamp; past times run right away.
    pub run_at: String,

    /// Movie title whose details to refresh; the listings when absent.
    #[serde(default)]
    pub title: Option<String>,
}

// ============================================================================
// Defaults
// ============================================================================

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_interval_secs() -> u64 {
    10
}
fn default_reconnect_cooldown_secs() -> u64 {
    600
}
fn default_probe_interval_secs() -> u64 {
    300
}
fn default_probe_timeout_secs() -> u64 {
    15
}
fn default_connect_timeout_secs() -> u64 {
    120
}
fn default_catalog_ttl_secs() -> u64 {
    900
}
fn default_detail_ttl_secs() -> u64 {
    86_400
}
fn default_detail_capacity() -> usize {
    1_000
}
fn default_detail_sweep_secs() -> u64 {
    86_400
}
fn default_max_pairs() -> usize {
    5
}
fn default_idle_expiry_secs() -> u64 {
    3_600
}
fn default_conversation_sweep_secs() -> u64 {
    1_800
}
fn default_max_identities() -> usize {
    10_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_utc_offset_hours() -> i32 {
    -3
}
fn default_max_listings() -> usize {
    40
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    600
}
fn default_lane_idle_secs() -> u64 {
    120
}
fn default_inbound_buffer() -> usize {
    256
}
fn default_lane_queue_depth() -> usize {
    16
}
