use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Output ceiling per answer; bounds latency, not derived from the input.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Primary env var holding one or more comma-separated keys.
pub const API_KEYS_ENV: &str = "GEMINI_API_KEYS";
/// Single-key fallback checked when `API_KEYS_ENV` is unset.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GlobalConfigError {
    #[error("invalid global config field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Final, merged configuration used by the running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    pub model: String,
    pub base_url: String,
    pub max_output_tokens: u32,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub connect_timeout_secs: u64,
    /// Upper bound on waiting for the upstream response head.
    pub request_timeout_secs: u64,
    /// Upper bound on the gap between two upstream stream chunks.
    pub stream_idle_timeout_secs: u64,
    pub max_upload_bytes: usize,
    /// Replaces the built-in tutoring persona when set.
    pub system_prompt: Option<String>,
}

impl GlobalConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optional layer used for merging configuration sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub proxy: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub stream_idle_timeout_secs: Option<u64>,
    pub max_upload_bytes: Option<usize>,
    pub system_prompt: Option<String>,
}

impl GlobalConfigPatch {
    /// Fields set in `other` win.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.host, other.host);
        take(&mut self.port, other.port);
        take(&mut self.model, other.model);
        take(&mut self.base_url, other.base_url);
        take(&mut self.max_output_tokens, other.max_output_tokens);
        take(&mut self.proxy, other.proxy);
        take(&mut self.connect_timeout_secs, other.connect_timeout_secs);
        take(&mut self.request_timeout_secs, other.request_timeout_secs);
        take(
            &mut self.stream_idle_timeout_secs,
            other.stream_idle_timeout_secs,
        );
        take(&mut self.max_upload_bytes, other.max_upload_bytes);
        take(&mut self.system_prompt, other.system_prompt);
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let config = GlobalConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_output_tokens: self.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            proxy: self.proxy,
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            stream_idle_timeout_secs: self
                .stream_idle_timeout_secs
                .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
            max_upload_bytes: self.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            system_prompt: self.system_prompt,
        };
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &GlobalConfig) -> Result<(), GlobalConfigError> {
    let invalid = |field: &'static str, reason: &'static str| -> Result<(), GlobalConfigError> {
        Err(GlobalConfigError::InvalidField { field, reason })
    };
    if config.port == 0 {
        return invalid("port", "must be greater than 0");
    }
    if config.model.trim().is_empty() {
        return invalid("model", "must not be empty");
    }
    if config.base_url.is_empty() {
        return invalid("base_url", "must not be empty");
    }
    if config.max_output_tokens == 0 {
        return invalid("max_output_tokens", "must be greater than 0");
    }
    if config.connect_timeout_secs == 0
        || config.request_timeout_secs == 0
        || config.stream_idle_timeout_secs == 0
    {
        return invalid("timeouts", "must be greater than 0");
    }
    Ok(())
}
