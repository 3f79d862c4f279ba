use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{info, warn};

use tutorgate_common::{API_KEY_ENV, API_KEYS_ENV, DEFAULT_REQUEST_TIMEOUT_SECS};
use tutorgate_provider_core::{
    ByteStream, GeminiEndpoint, KeyPool, UpstreamBody, UpstreamFailure, UpstreamHttpRequest,
    UpstreamTransportErrorKind, is_retryable, mask_key,
};

use crate::error::DispatchError;
use crate::payload::{PayloadConfig, build_generate_request};
use crate::relay::{ChatStream, FragmentReader, single_chunk, spawn_relay};
use crate::request::ChatRequest;
use crate::upstream_client::UpstreamClient;

/// Sends each chat turn through the key pool, retrying at most once on
/// another key when the failure looks key-specific.
pub struct RequestDispatcher {
    pool: Option<Arc<KeyPool>>,
    endpoint: GeminiEndpoint,
    client: Arc<dyn UpstreamClient>,
    payload: PayloadConfig,
    request_timeout: Duration,
}

impl RequestDispatcher {
    /// `pool` is `None` when no key is configured; every request then fails
    /// with a configuration error.
    pub fn new(
        pool: Option<Arc<KeyPool>>,
        endpoint: GeminiEndpoint,
        client: Arc<dyn UpstreamClient>,
        payload: PayloadConfig,
    ) -> Self {
        Self {
            pool,
            endpoint,
            client,
            payload,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Bound on waiting for the response head and the first fragment.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn pool(&self) -> Option<&Arc<KeyPool>> {
        self.pool.as_ref()
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<ChatStream, DispatchError> {
        request.validate()?;
        let Some(pool) = self.pool.as_deref() else {
            return Err(DispatchError::Configuration(format!(
                "no Gemini API key configured; set {API_KEYS_ENV} or {API_KEY_ENV}"
            )));
        };

        let (index, key) = pool.next_available();
        let failure = match self.attempt(&request, index, &key, 1).await? {
            Ok(stream) => {
                pool.advance();
                return Ok(stream);
            }
            Err(failure) => failure,
        };

        let message = failure.message();
        if !is_retryable(&message) {
            warn!(
                event = "dispatch.failed",
                key_index = index,
                retryable = false,
                error = %message,
                "upstream request failed"
            );
            return Err(DispatchError::Upstream {
                message,
                retryable: false,
            });
        }
        warn!(
            event = "dispatch.retrying",
            key_index = index,
            error = %message,
            "key-specific failure, switching key"
        );
        if pool.mark_failed_and_check(index) {
            return Err(DispatchError::PoolExhausted { message });
        }

        let (index, key) = pool.next_available();
        match self.attempt(&request, index, &key, 2).await? {
            Ok(stream) => {
                pool.advance();
                Ok(stream)
            }
            Err(failure) => {
                let message = failure.message();
                let retryable = is_retryable(&message);
                warn!(
                    event = "dispatch.failed",
                    key_index = index,
                    retryable,
                    error = %message,
                    "retry failed"
                );
                if retryable && pool.mark_failed_and_check(index) {
                    return Err(DispatchError::PoolExhausted { message });
                }
                Err(DispatchError::Upstream { message, retryable })
            }
        }
    }

    /// One provider call. The payload is rebuilt from the untouched request
    /// every time. The outer error is local and ends the request; the inner
    /// one is the upstream outcome fed to the retry policy.
    async fn attempt(
        &self,
        request: &ChatRequest,
        index: usize,
        key: &str,
        attempt: u8,
    ) -> Result<Result<ChatStream, UpstreamFailure>, DispatchError> {
        let body = build_generate_request(request, &self.payload);
        let upstream = self
            .endpoint
            .build_stream_generate(key, &body)
            .map_err(|err| DispatchError::Internal(err.to_string()))?;

        info!(
            event = "dispatch.attempt",
            attempt,
            key_index = index,
            key = %mask_key(key),
            model = %self.payload.model,
            "calling Gemini"
        );

        let primed = tokio::time::timeout(self.request_timeout, self.open_stream(upstream)).await;
        Ok(match primed {
            Ok(Ok((first, reader))) => Ok(spawn_relay(first, reader)),
            Ok(Err(failure)) => Err(failure),
            Err(_) => Err(UpstreamFailure::Transport {
                kind: UpstreamTransportErrorKind::Timeout,
                message: format!("no response within {}s", self.request_timeout.as_secs()),
            }),
        })
    }

    /// Sends the request and reads up to the first fragment, so an error that
    /// arrives as the first stream event still counts as a failed attempt.
    async fn open_stream(
        &self,
        upstream: UpstreamHttpRequest,
    ) -> Result<(Option<String>, FragmentReader), UpstreamFailure> {
        let response = self.client.send(upstream).await?;
        if !response.is_success() {
            let body = match response.body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(stream) => drain(stream).await,
            };
            return Err(UpstreamFailure::Http {
                status: response.status,
                headers: response.headers,
                body,
            });
        }

        let stream = match response.body {
            UpstreamBody::Stream(stream) => stream,
            UpstreamBody::Bytes(bytes) => single_chunk(bytes),
        };
        let mut reader = FragmentReader::new(stream);
        match reader.next_fragment().await {
            Some(Ok(text)) => Ok((Some(text), reader)),
            Some(Err(failure)) => Err(failure),
            None => Ok((None, reader)),
        }
    }
}

async fn drain(mut stream: ByteStream) -> bytes::Bytes {
    let mut out = BytesMut::new();
    while let Some(Ok(chunk)) = stream.recv().await {
        out.extend_from_slice(&chunk);
    }
    out.freeze()
}
