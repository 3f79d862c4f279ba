use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use tutorgate_core::{ChatRequest, ChatStream, DispatchError, InlineImage, RequestDispatcher};
use tutorgate_protocol::gemini::Content;

const DEFAULT_IMAGE_MIME: &str = "application/octet-stream";
const STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

#[derive(Clone)]
pub struct ChatState {
    pub dispatcher: Arc<RequestDispatcher>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    detail: String,
}

pub(crate) async fn chat(
    State(state): State<ChatState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request = match multipart {
        Ok(multipart) => read_chat_form(multipart).await,
        Err(rejection) => Err(DispatchError::InvalidRequest(rejection.body_text())),
    };
    let request = match request {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };

    info!(
        event = "chat.request",
        first_turn = request.is_first_turn(),
        history_turns = request.history.len(),
        has_image = request.image.is_some(),
        "chat request"
    );

    match state.dispatcher.handle(request).await {
        Ok(stream) => stream_response(stream),
        Err(err) => {
            warn!(event = "chat.failed", kind = err.kind(), error = %err, "chat request failed");
            error_response(&err)
        }
    }
}

/// Reads `prompt`, `history` and `image`. Unknown fields are skipped.
async fn read_chat_form(mut multipart: Multipart) -> Result<ChatRequest, DispatchError> {
    let mut request = ChatRequest::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => {
                request.prompt_text = field.text().await.map_err(multipart_error)?;
            }
            "history" => {
                let raw = field.text().await.map_err(multipart_error)?;
                request.history = parse_history(&raw)?;
            }
            "image" => {
                let mime_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
                let data = field.bytes().await.map_err(multipart_error)?;
                if !data.is_empty() {
                    request.image = Some(InlineImage { mime_type, data });
                }
            }
            _ => {}
        }
    }
    Ok(request)
}

fn parse_history(raw: &str) -> Result<Vec<Content>, DispatchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|err| DispatchError::InvalidRequest(format!("history is not valid JSON: {err}")))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> DispatchError {
    DispatchError::InvalidRequest(err.body_text())
}

fn stream_response(stream: ChatStream) -> Response {
    let body = Body::from_stream(ReceiverStream::new(stream).map(Ok::<Bytes, Infallible>));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(STREAM_CONTENT_TYPE),
    );
    // Reverse proxies must not buffer the answer.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

pub(crate) fn error_response(err: &DispatchError) -> Response {
    let body = ErrorBody {
        error: err.kind(),
        detail: err.to_string(),
    };
    (err.status(), Json(body)).into_response()
}
