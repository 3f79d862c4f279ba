use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use tutorgate_protocol::gemini::GeminiErrorBody;

use crate::headers::Headers;

/// Upstream body chunks. An `Err` item ends the stream early.
pub type ByteStream = tokio::sync::mpsc::Receiver<Result<Bytes, UpstreamFailure>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

impl UpstreamTransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamTransportErrorKind::Timeout => "timeout",
            UpstreamTransportErrorKind::ReadTimeout => "read_timeout",
            UpstreamTransportErrorKind::Connect => "connect",
            UpstreamTransportErrorKind::Dns => "dns",
            UpstreamTransportErrorKind::Tls => "tls",
            UpstreamTransportErrorKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Transport-level failures (no HTTP response).
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// HTTP error response captured as bytes (usually non-2xx), or an error
    /// envelope received inside an otherwise successful stream.
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

impl UpstreamFailure {
    /// Single-line description fed to the retry classifier and surfaced to
    /// callers: `[429 Too Many Requests] <message> (<STATUS>; <REASON>...)`.
    pub fn message(&self) -> String {
        match self {
            UpstreamFailure::Transport { kind, message } => {
                format!("upstream transport error ({}): {message}", kind.as_str())
            }
            UpstreamFailure::Http { status, body, .. } => http_failure_message(*status, body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            UpstreamFailure::Transport { .. } => None,
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

fn http_failure_message(status: u16, body: &Bytes) -> String {
    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown Status");
    let detail = match GeminiErrorBody::parse(body) {
        Some(envelope) => envelope.error.summary(),
        None => String::from_utf8_lossy(body).trim().to_string(),
    };
    if detail.is_empty() {
        format!("[{status} {reason}]")
    } else {
        format!("[{status} {reason}] {detail}")
    }
}
