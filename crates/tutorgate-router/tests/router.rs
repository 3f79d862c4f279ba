use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use tutorgate_core::{PayloadConfig, RequestDispatcher, UpstreamClient};
use tutorgate_provider_core::{
    GeminiEndpoint, KeyPool, UpstreamBody, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse,
};
use tutorgate_router::app_router;

const BOUNDARY: &str = "tutorgate-test-boundary";
const BODY_LIMIT: usize = 1024 * 1024;

/// Answers every call with the same scripted upstream reply.
struct StubClient {
    reply: Result<Vec<&'static str>, (u16, &'static str)>,
    bodies: Mutex<Vec<Value>>,
}

impl StubClient {
    fn answering(fragments: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(fragments),
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn failing(status: u16, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err((status, body)),
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().expect("bodies lock").clone()
    }
}

impl UpstreamClient for StubClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let body: Value =
                serde_json::from_slice(req.body.as_deref().unwrap_or_default()).expect("json body");
            self.bodies.lock().expect("bodies lock").push(body);

            match &self.reply {
                Ok(fragments) => {
                    let (tx, rx) = mpsc::channel(fragments.len().max(1));
                    for text in fragments {
                        let chunk = serde_json::json!({
                            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
                        });
                        tx.try_send(Ok(Bytes::from(format!("data: {chunk}\n\n"))))
                            .expect("room");
                    }
                    Ok(UpstreamHttpResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: UpstreamBody::Stream(rx),
                    })
                }
                Err((status, body)) => Ok(UpstreamHttpResponse {
                    status: *status,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
            }
        })
    }
}

fn router_with(keys: Option<&str>, client: Arc<StubClient>, max_upload_bytes: usize) -> Router {
    let pool = keys.map(|raw| Arc::new(KeyPool::from_raw(raw).expect("pool")));
    let dispatcher = RequestDispatcher::new(
        pool,
        GeminiEndpoint::new("https://generativelanguage.googleapis.com").expect("endpoint"),
        client,
        PayloadConfig::new("gemini-2.5-flash"),
    );
    app_router(Arc::new(dispatcher), max_upload_bytes)
}

enum FormPart<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_request(parts: &[FormPart<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            FormPart::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            FormPart::File(name, mime, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"upload\"\r\nContent-Type: {mime}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("build request")
}

async fn text_body(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse json")
}

#[tokio::test]
async fn chat_streams_answer_text() {
    let client = StubClient::answering(vec!["Hello", ", ", "world"]);
    let app = router_with(Some("k1"), client, BODY_LIMIT);

    let response = app
        .oneshot(multipart_request(&[FormPart::Text("prompt", "hi")]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "text/event-stream; charset=utf-8"
    );
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(text_body(response).await, "Hello, world");
}

#[tokio::test]
async fn uploaded_image_reaches_upstream_inline() {
    let client = StubClient::answering(vec!["ok"]);
    let app = router_with(Some("k1"), client.clone(), BODY_LIMIT);

    let response = app
        .oneshot(multipart_request(&[
            FormPart::Text("prompt", "what is this?"),
            FormPart::File("image", "image/png", b"\x89PNG"),
            FormPart::Text("ignored", "whatever"),
        ]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::OK);
    text_body(response).await;

    let bodies = client.bodies();
    let parts = &bodies[0]["contents"][0]["parts"];
    assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
    assert_eq!(parts[1]["inlineData"]["data"], "iVBORw==");
    assert_eq!(parts[2]["text"], "what is this?");
}

#[tokio::test]
async fn history_turns_are_forwarded() {
    let client = StubClient::answering(vec!["because"]);
    let app = router_with(Some("k1"), client.clone(), BODY_LIMIT);
    let history = r#"[{"role":"user","parts":[{"text":"persona"},{"text":"2+2?"}]},{"role":"model","parts":[{"text":"4"}]}]"#;

    let response = app
        .oneshot(multipart_request(&[
            FormPart::Text("prompt", "why?"),
            FormPart::Text("history", history),
        ]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "because");

    let contents = client.bodies()[0]["contents"].clone();
    assert_eq!(contents.as_array().map(Vec::len), Some(3));
    assert_eq!(contents[1]["parts"][0]["text"], "4");
    assert_eq!(contents[2]["parts"][0]["text"], "why?");
}

#[tokio::test]
async fn empty_form_is_rejected() {
    let client = StubClient::answering(vec!["unused"]);
    let app = router_with(Some("k1"), client.clone(), BODY_LIMIT);

    let response = app
        .oneshot(multipart_request(&[
            FormPart::Text("prompt", "   "),
            FormPart::File("image", "image/png", b""),
        ]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_request");
    assert!(client.bodies().is_empty());
}

#[tokio::test]
async fn malformed_history_is_rejected() {
    let client = StubClient::answering(vec!["unused"]);
    let app = router_with(Some("k1"), client.clone(), BODY_LIMIT);

    let response = app
        .oneshot(multipart_request(&[
            FormPart::Text("prompt", "hi"),
            FormPart::Text("history", "[{\"role\":"),
        ]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_request");
    assert!(json["detail"].as_str().unwrap_or_default().contains("history"));
    assert!(client.bodies().is_empty());
}

#[tokio::test]
async fn non_multipart_body_is_rejected() {
    let app = router_with(Some("k1"), StubClient::answering(vec![]), BODY_LIMIT);

    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"prompt":"hi"}"#))
        .expect("build request");
    let response = app.oneshot(request).await.expect("router call");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let client = StubClient::answering(vec!["unused"]);
    let app = router_with(Some("k1"), client.clone(), 256);
    let image = vec![0u8; 4096];

    let response = app
        .oneshot(multipart_request(&[
            FormPart::Text("prompt", "hi"),
            FormPart::File("image", "image/png", &image),
        ]))
        .await
        .expect("router call");
    assert!(response.status().is_client_error());
    assert!(client.bodies().is_empty());
}

#[tokio::test]
async fn missing_keys_surface_as_configuration_error() {
    let client = StubClient::answering(vec!["unused"]);
    let app = router_with(None, client.clone(), BODY_LIMIT);

    let response = app
        .oneshot(multipart_request(&[FormPart::Text("prompt", "hi")]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "configuration_error");
    assert!(client.bodies().is_empty());
}

#[tokio::test]
async fn exhausted_pool_is_service_unavailable() {
    let client = StubClient::failing(
        429,
        r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#,
    );
    let app = router_with(Some("only"), client, BODY_LIMIT);

    let response = app
        .oneshot(multipart_request(&[FormPart::Text("prompt", "hi")]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = json_body(response).await;
    assert_eq!(json["error"], "pool_exhausted");
    assert!(json["detail"].as_str().unwrap_or_default().contains("429"));
}

#[tokio::test]
async fn upstream_rejection_is_an_upstream_error() {
    let client = StubClient::failing(
        400,
        r#"{"error":{"code":400,"message":"Unsupported MIME type","status":"INVALID_ARGUMENT"}}"#,
    );
    let app = router_with(Some("k1,k2"), client.clone(), BODY_LIMIT);

    let response = app
        .oneshot(multipart_request(&[FormPart::Text("prompt", "hi")]))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "upstream_error");
    assert_eq!(client.bodies().len(), 1);
}

#[tokio::test]
async fn health_reports_pool_state() {
    let app = router_with(Some("k1,k2"), StubClient::answering(vec![]), BODY_LIMIT);
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await.expect("router call");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pool"]["size"], 2);
    assert_eq!(json["pool"]["cursor"], 0);
    assert!(!json.to_string().contains("k1"));
}

#[tokio::test]
async fn health_without_keys_is_unconfigured() {
    let app = router_with(None, StubClient::answering(vec![]), BODY_LIMIT);
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await.expect("router call");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "unconfigured");
    assert!(json["pool"].is_null());
}
