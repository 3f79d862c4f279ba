use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method, Proxy};

use tutorgate_common::GlobalConfig;
use tutorgate_provider_core::{
    Headers, HttpMethod, UpstreamBody, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl UpstreamClientConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            proxy: global.proxy.clone(),
            connect_timeout: Duration::from_secs(global.connect_timeout_secs),
            stream_idle_timeout: Duration::from_secs(global.stream_idle_timeout_secs),
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(tutorgate_common::DEFAULT_CONNECT_TIMEOUT_SECS),
            stream_idle_timeout: Duration::from_secs(
                tutorgate_common::DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            ),
        }
    }
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let proxy = normalize_proxy(config.proxy.clone());
        let client = build_client(&config, proxy.as_deref())?;
        Ok(Self { config, client })
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

// No total timeout. The dispatcher bounds the response head and the pump
// bounds idle gaps between chunks.
fn build_client(config: &UpstreamClientConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.stream_idle_timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let method = http_method_to_wreq(req.method);
            let mut builder = self.client.request(method, &req.url);

            for (k, v) in &req.headers {
                builder = builder.header(k, v);
            }

            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream, self.config.stream_idle_timeout).await
        })
    }
}

fn http_method_to_wreq(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamHttpResponse, UpstreamFailure> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, UpstreamFailure>>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = tx.closed() => break,
                next = tokio::time::timeout(stream_idle_timeout, stream.next()) => next,
            };
            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    let _ = tx
                        .send(Err(UpstreamFailure::Transport {
                            kind: UpstreamTransportErrorKind::ReadTimeout,
                            message: format!(
                                "no data from upstream for {}s",
                                stream_idle_timeout.as_secs()
                            ),
                        }))
                        .await;
                    break;
                }
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => Ok(chunk),
                Err(err) => Err(map_wreq_error(err)),
            };
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    Ok(UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (k, v) in map {
        if let Ok(s) = v.to_str() {
            out.push((k.as_str().to_string(), s.to_string()));
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let kind = classify_wreq_error(&err);
    UpstreamFailure::Transport {
        kind,
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> UpstreamTransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return UpstreamTransportErrorKind::ReadTimeout;
        }
        return UpstreamTransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return UpstreamTransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return UpstreamTransportErrorKind::Tls;
        }
        return UpstreamTransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return UpstreamTransportErrorKind::Tls;
    }
    UpstreamTransportErrorKind::Other
}
