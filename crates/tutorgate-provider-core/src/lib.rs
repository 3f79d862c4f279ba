//! Provider-facing building blocks for tutorgate.
//!
//! This crate does not depend on axum or any concrete HTTP client. It owns the
//! API key pool, the retry classifier and the request/response shapes; a
//! higher layer performs IO.

pub mod classify;
pub mod errors;
pub mod gemini;
pub mod headers;
pub mod key_pool;
pub mod provider;

pub use classify::{RETRYABLE_SIGNALS, is_retryable};
pub use errors::{ProviderError, ProviderResult};
pub use gemini::{API_KEY_HEADER, GeminiEndpoint};
pub use headers::{Headers, header_get, header_set};
pub use key_pool::{KeyPool, PoolError, PoolSnapshot, mask_key, parse_keys};
pub use provider::{
    ByteStream, HttpMethod, UpstreamBody, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
