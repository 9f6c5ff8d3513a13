//! Configuration and settings management
//!
//! Loads settings from environment variables and defines pipeline constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Twilio account SID
    pub twilio_account_sid: String,
    /// Twilio auth token, also the webhook signing key
    pub twilio_auth_token: String,
    /// WhatsApp Business number messages are sent from
    pub twilio_whatsapp_number: String,

    /// OpenAI API key
    pub openai_api_key: String,
    /// Chat model identifier
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// Override for the OpenAI-compatible API base URL
    pub openai_base_url: Option<String>,

    /// Base URL of the catalog/order service consumed by the tools
    #[serde(default = "default_catalog_base_url")]
    pub catalog_base_url: String,

    /// Messages allowed per sender per window
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u64,

    /// Webhook listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_catalog_base_url() -> String {
    "http://127.0.0.1:9100".to_string()
}

const fn default_rate_limit_per_minute() -> u64 {
    30
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Also add settings from environment variables directly
            // Note: Environment::default() auto-converts UPPER_SNAKE_CASE to snake_case
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }
}

// Rate limiting
/// Fixed rate window length in seconds
pub const RATE_WINDOW_SECS: u64 = 60;
/// TTL for rate window counters (two windows, so a window is never evicted mid-flight)
pub const RATE_WINDOW_TTL_SECS: u64 = 2 * RATE_WINDOW_SECS;
/// Maximum tracked rate windows
pub const RATE_WINDOW_MAX_ENTRIES: u64 = 100_000;

// Idempotency ledger
/// Retention window for claimed message SIDs in seconds
pub const IDEMPOTENCY_RETENTION_SECS: u64 = 24 * 60 * 60;
/// Maximum retained message SIDs
pub const IDEMPOTENCY_MAX_ENTRIES: u64 = 100_000;

// Session store
/// Session lifetime in seconds; refreshed on every write
pub const SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// Maximum concurrent sender sessions
pub const SESSION_MAX_ENTRIES: u64 = 50_000;
/// Maximum subjects remembered per conversation
pub const MAX_DISCUSSED_SUBJECTS: usize = 8;

// Model invocation
/// HTTP timeout for a single model round in seconds
pub const LLM_HTTP_TIMEOUT_SECS: u64 = 5;
/// Attempts per model invocation
pub const MODEL_MAX_ATTEMPTS: usize = 3;
/// Initial backoff between model attempts in milliseconds (doubles each retry)
pub const MODEL_RETRY_BASE_DELAY_MS: u64 = 400;
/// Maximum output tokens per model round
pub const MODEL_MAX_TOKENS: u32 = 400;
/// Sampling temperature
pub const MODEL_TEMPERATURE: f32 = 0.4;

// Tool dispatch
/// Default per-tool execution timeout in seconds
pub const TOOL_TIMEOUT_SECS: u64 = 8;
/// Cap on the serialized tool result handed back to the model, in characters
pub const TOOL_RESULT_MAX_CHARS: usize = 4_000;

// Outbound delivery
/// HTTP timeout for gateway and collaborator requests in seconds
pub const OUTBOUND_HTTP_TIMEOUT_SECS: u64 = 10;
/// Retry attempts for a single gateway send
pub const GATEWAY_MAX_RETRIES: usize = 3;
/// Initial gateway retry backoff in milliseconds
pub const GATEWAY_INITIAL_BACKOFF_MS: u64 = 400;
/// Maximum gateway retry backoff in milliseconds
pub const GATEWAY_MAX_BACKOFF_MS: u64 = 4_000;
/// Pause between sequential image sends in milliseconds
pub const IMAGE_PACING_MS: u64 = 400;
/// Maximum images per reply
pub const MAX_IMAGES_PER_REPLY: usize = 5;
/// WhatsApp text body limit in characters
pub const MAX_BODY_CHARS: usize = 1_600;

// Pipeline
/// Overall deadline for handling one inbound message, in seconds
pub const PIPELINE_DEADLINE_SECS: u64 = 20;
/// Inbound message body cap in characters
pub const MAX_INBOUND_CHARS: usize = 2_000;
