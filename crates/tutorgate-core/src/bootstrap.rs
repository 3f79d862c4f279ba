use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use tutorgate_common::{API_KEY_ENV, API_KEYS_ENV, GlobalConfig, GlobalConfigPatch};
use tutorgate_provider_core::{GeminiEndpoint, KeyPool};

use crate::dispatcher::RequestDispatcher;
use crate::payload::PayloadConfig;
use crate::upstream_client::{UpstreamClientConfig, WreqUpstreamClient};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "tutorgate",
    version,
    about = "Streaming tutoring chat gateway in front of Gemini"
)]
pub struct CliArgs {
    /// Bind host.
    #[arg(long, env = "TUTORGATE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "TUTORGATE_PORT")]
    pub port: Option<String>,

    /// Gemini model name, with or without the `models/` prefix.
    #[arg(long, env = "TUTORGATE_MODEL")]
    pub model: Option<String>,

    /// Generative Language API base URL.
    #[arg(long, env = "TUTORGATE_BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "TUTORGATE_MAX_OUTPUT_TOKENS")]
    pub max_output_tokens: Option<String>,

    /// Optional outbound proxy for upstream requests.
    #[arg(long, env = "TUTORGATE_PROXY")]
    pub proxy: Option<String>,

    /// Seconds allowed to open the upstream connection.
    #[arg(long, env = "TUTORGATE_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<String>,

    /// Seconds to wait for the upstream response to start.
    #[arg(long, env = "TUTORGATE_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<String>,

    /// Seconds allowed between two upstream stream chunks.
    #[arg(long, env = "TUTORGATE_STREAM_IDLE_TIMEOUT_SECS")]
    pub stream_idle_timeout_secs: Option<String>,

    /// Upper bound on a multipart upload, in bytes.
    #[arg(long, env = "TUTORGATE_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: Option<String>,

    /// File whose contents replace the built-in tutoring persona.
    #[arg(long, env = "TUTORGATE_SYSTEM_PROMPT_FILE")]
    pub system_prompt_file: Option<PathBuf>,
}

pub struct Bootstrap {
    pub config: GlobalConfig,
    pub dispatcher: Arc<RequestDispatcher>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let mut patch = patch_from_args(&args)?;
    if let Some(path) = &args.system_prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read system prompt file {}", path.display()))?;
        patch.overlay(GlobalConfigPatch {
            system_prompt: sanitize_optional_env_value(Some(prompt)),
            ..GlobalConfigPatch::default()
        });
    }
    let config = patch.into_config().context("validate config")?;

    let pool = match KeyPool::from_env(API_KEYS_ENV, API_KEY_ENV) {
        Ok(pool) => {
            info!(event = "bootstrap.key_pool", size = pool.len(), "key pool ready");
            Some(Arc::new(pool))
        }
        Err(err) => {
            warn!(
                event = "bootstrap.key_pool",
                error = %err,
                "no usable Gemini API key; chat requests will fail until one is configured"
            );
            None
        }
    };

    let dispatcher = build_dispatcher(&config, pool)?;
    info!(
        event = "bootstrap.config",
        bind = %config.bind_addr(),
        model = %config.model,
        base_url = %config.base_url,
        max_output_tokens = config.max_output_tokens,
        proxy = config.proxy.is_some(),
        "configuration loaded"
    );

    Ok(Bootstrap {
        config,
        dispatcher: Arc::new(dispatcher),
    })
}

/// Wires a dispatcher to the real HTTP client.
pub fn build_dispatcher(
    config: &GlobalConfig,
    pool: Option<Arc<KeyPool>>,
) -> anyhow::Result<RequestDispatcher> {
    let endpoint = GeminiEndpoint::new(config.base_url.clone()).context("gemini endpoint")?;
    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_global(config))
        .context("build upstream client")?;

    let mut payload = PayloadConfig::new(config.model.clone());
    payload.max_output_tokens = config.max_output_tokens;
    if let Some(system_prompt) = &config.system_prompt {
        payload.system_prompt = system_prompt.clone();
    }

    Ok(
        RequestDispatcher::new(pool, endpoint, Arc::new(client), payload)
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs)),
    )
}

/// CLI and env layer. clap already applies CLI > ENV per field.
fn patch_from_args(args: &CliArgs) -> anyhow::Result<GlobalConfigPatch> {
    Ok(GlobalConfigPatch {
        host: sanitize_optional_env_value(args.host.clone()),
        port: parse_env_value(args.port.clone(), "TUTORGATE_PORT")?,
        model: sanitize_optional_env_value(args.model.clone()),
        base_url: sanitize_optional_env_value(args.base_url.clone()),
        max_output_tokens: parse_env_value(
            args.max_output_tokens.clone(),
            "TUTORGATE_MAX_OUTPUT_TOKENS",
        )?,
        proxy: sanitize_optional_env_value(args.proxy.clone()),
        connect_timeout_secs: parse_env_value(
            args.connect_timeout_secs.clone(),
            "TUTORGATE_CONNECT_TIMEOUT_SECS",
        )?,
        request_timeout_secs: parse_env_value(
            args.request_timeout_secs.clone(),
            "TUTORGATE_REQUEST_TIMEOUT_SECS",
        )?,
        stream_idle_timeout_secs: parse_env_value(
            args.stream_idle_timeout_secs.clone(),
            "TUTORGATE_STREAM_IDLE_TIMEOUT_SECS",
        )?,
        max_upload_bytes: parse_env_value(
            args.max_upload_bytes.clone(),
            "TUTORGATE_MAX_UPLOAD_BYTES",
        )?,
        system_prompt: None,
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Unresolved `${VAR}` placeholders injected by some hosts count as unset.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn parse_env_value<T>(value: Option<String>, env_name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<T>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}
