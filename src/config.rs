use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_ALLOWED_CONTENT_TYPES: &str = "image/jpeg,image/png,application/pdf";
const DEFAULT_VISION_API_URL: &str = "https://vision.googleapis.com/v1";
const DEFAULT_INFERENCE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const SAFETY_THRESHOLDS: [&str; 5] = [
    "BLOCK_NONE",
    "BLOCK_ONLY_HIGH",
    "BLOCK_MEDIUM_AND_ABOVE",
    "BLOCK_LOW_AND_ABOVE",
    "OFF",
];

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// `init_config` was called after the configuration had already been installed.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server listens on.
    pub server_port: u16,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Content types accepted by the upload validator (lower-case, no parameters).
    pub allowed_content_types: Vec<String>,
    /// Base URL of the OCR/vision service.
    pub vision_api_url: String,
    /// Credential sent to the vision service.
    pub vision_api_key: Option<String>,
    /// Base URL of the generative extraction service.
    pub inference_api_url: String,
    /// Credential sent to the generative extraction service.
    pub inference_api_key: Option<String>,
    /// Model identifier used for structured extraction.
    pub inference_model: String,
    /// Sampling parameters forwarded to the generative service.
    pub generation: GenerationSettings,
    /// Send the uploaded document to the generative service next to the OCR text.
    pub attach_upload: bool,
    /// Retry, backoff and timeout discipline applied to every external call.
    pub retry: RetryPolicy,
    /// Slack added on top of the worst-case stage time to form the request deadline.
    pub request_timeout_margin: Duration,
    /// Optional JSON file declaring additional extraction schema variants.
    pub schemas_file: Option<PathBuf>,
    /// Schema variant used when the request does not name one.
    pub default_schema: String,
}

/// Generation parameters for the structured extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    /// Sampling temperature; low values keep extraction deterministic.
    pub temperature: f32,
    /// Nucleus sampling threshold.
    pub top_p: f32,
    /// Output token budget for a single response.
    pub max_output_tokens: u32,
    /// Block threshold applied to every harm category; scanned documents are not filtered by
    /// default.
    pub safety_threshold: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.5,
            max_output_tokens: 8192,
            safety_threshold: "BLOCK_NONE".into(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: millis_or("RETRY_BASE_DELAY_MS", defaults.base_delay)?,
            multiplier: parse_or("RETRY_MULTIPLIER", defaults.multiplier)?,
            max_delay: millis_or("RETRY_MAX_DELAY_MS", defaults.max_delay)?,
            call_timeout: millis_or("CALL_TIMEOUT_MS", defaults.call_timeout)?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS".into()));
        }
        if !(retry.multiplier >= 1.0) {
            return Err(ConfigError::InvalidValue("RETRY_MULTIPLIER".into()));
        }

        let generation_defaults = GenerationSettings::default();
        let config = Self {
            server_port: match load_env_optional("PORT") {
                Some(_) => parse_or("PORT", DEFAULT_PORT)?,
                None => parse_or("SERVER_PORT", DEFAULT_PORT)?,
            },
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            allowed_content_types: parse_content_types(
                &load_env_optional("ALLOWED_CONTENT_TYPES")
                    .unwrap_or_else(|| DEFAULT_ALLOWED_CONTENT_TYPES.to_string()),
            )
            .ok_or_else(|| ConfigError::InvalidValue("ALLOWED_CONTENT_TYPES".into()))?,
            vision_api_url: load_env_optional("VISION_API_URL")
                .unwrap_or_else(|| DEFAULT_VISION_API_URL.to_string()),
            vision_api_key: load_env_optional("VISION_API_KEY"),
            inference_api_url: load_env_optional("INFERENCE_API_URL")
                .unwrap_or_else(|| DEFAULT_INFERENCE_API_URL.to_string()),
            inference_api_key: load_env_optional("INFERENCE_API_KEY"),
            inference_model: load_env("INFERENCE_MODEL")?,
            generation: GenerationSettings {
                temperature: parse_or("INFERENCE_TEMPERATURE", generation_defaults.temperature)?,
                top_p: parse_or("INFERENCE_TOP_P", generation_defaults.top_p)?,
                max_output_tokens: parse_or(
                    "INFERENCE_MAX_OUTPUT_TOKENS",
                    generation_defaults.max_output_tokens,
                )?,
                safety_threshold: match load_env_optional("INFERENCE_SAFETY_THRESHOLD") {
                    Some(raw) => parse_safety_threshold(&raw).ok_or_else(|| {
                        ConfigError::InvalidValue("INFERENCE_SAFETY_THRESHOLD".into())
                    })?,
                    None => generation_defaults.safety_threshold.clone(),
                },
            },
            attach_upload: parse_or("INFERENCE_ATTACH_UPLOAD", true)?,
            retry,
            request_timeout_margin: millis_or(
                "REQUEST_TIMEOUT_MARGIN_MS",
                Duration::from_millis(1000),
            )?,
            schemas_file: load_env_optional("EXTRACTION_SCHEMAS_FILE").map(PathBuf::from),
            default_schema: load_env_optional("DEFAULT_SCHEMA")
                .unwrap_or_else(|| crate::inference::DEFAULT_SCHEMA_NAME.to_string()),
        };

        if config.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue("MAX_UPLOAD_BYTES".into()));
        }

        Ok(config)
    }

    /// Deadline for a whole request: both stages at their worst case plus the margin.
    pub fn request_deadline(&self) -> Duration {
        self.retry.worst_case_duration() * 2 + self.request_timeout_margin
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn millis_or(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis: u64 = parse_or(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

/// Normalize a harm block threshold, rejecting names the generative service does not know.
pub fn parse_safety_threshold(raw: &str) -> Option<String> {
    let threshold = raw.trim().to_ascii_uppercase();
    SAFETY_THRESHOLDS
        .contains(&threshold.as_str())
        .then_some(threshold)
}

/// Split a comma-separated allow-list into normalized media types.
///
/// Returns `None` when the list is empty after trimming.
pub fn parse_content_types(raw: &str) -> Option<Vec<String>> {
    let types: Vec<String> = raw
        .split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect();
    if types.is_empty() { None } else { Some(types) }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

fn install(config: Config) -> Result<(), ConfigError> {
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<(), ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        port = config.server_port,
        max_upload_bytes = config.max_upload_bytes,
        allowed = ?config.allowed_content_types,
        vision_url = %config.vision_api_url,
        inference_url = %config.inference_api_url,
        model = %config.inference_model,
        max_attempts = config.retry.max_attempts,
        "Loaded configuration"
    );
    install(config)
}
