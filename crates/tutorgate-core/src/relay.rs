use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::mpsc;

use tutorgate_protocol::gemini::{FinishReason, GeminiErrorBody, GenerateContentResponse};
use tutorgate_protocol::sse::{SseDecoder, SseEvent};
use tutorgate_provider_core::{ByteStream, UpstreamFailure};

/// Answer text as it is written to the caller, one fragment per item.
pub type ChatStream = mpsc::Receiver<Bytes>;

const RELAY_BUFFER: usize = 32;

type Fragment = Result<String, UpstreamFailure>;

/// Turns an upstream SSE byte stream into answer text fragments.
///
/// Yields `Err` at most once; nothing follows it.
#[derive(Debug)]
pub struct FragmentReader {
    upstream: ByteStream,
    decoder: SseDecoder,
    queued: VecDeque<Fragment>,
    finish_reason: Option<FinishReason>,
    done: bool,
}

impl FragmentReader {
    pub fn new(upstream: ByteStream) -> Self {
        Self {
            upstream,
            decoder: SseDecoder::new(),
            queued: VecDeque::new(),
            finish_reason: None,
            done: false,
        }
    }

    /// Last finish reason reported upstream, if any.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Next non-empty fragment, `None` once the stream has ended.
    pub async fn next_fragment(&mut self) -> Option<Fragment> {
        loop {
            if let Some(item) = self.queued.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            match self.upstream.recv().await {
                Some(Ok(chunk)) => {
                    for event in self.decoder.push(&chunk) {
                        if !self.queue_event(event) {
                            break;
                        }
                    }
                }
                Some(Err(failure)) => {
                    self.queued.push_back(Err(failure));
                    self.done = true;
                }
                None => {
                    if let Some(event) = self.decoder.finish() {
                        self.queue_event(event);
                    }
                    self.done = true;
                }
            }
        }
    }

    /// Returns `false` once the stream must not yield anything further.
    fn queue_event(&mut self, event: SseEvent) -> bool {
        if self.done {
            return false;
        }
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return true;
        }
        if let Some(envelope) = GeminiErrorBody::parse(data.as_bytes()) {
            self.queued.push_back(Err(UpstreamFailure::Http {
                status: envelope.error.code.unwrap_or(500),
                headers: Vec::new(),
                body: Bytes::copy_from_slice(data.as_bytes()),
            }));
            self.done = true;
            return false;
        }
        match serde_json::from_str::<GenerateContentResponse>(data) {
            Ok(response) => {
                if let Some(reason) = response.finish_reason() {
                    self.finish_reason = Some(reason);
                }
                if let Some(text) = response.text_fragment() {
                    self.queued.push_back(Ok(text));
                } else if let Some(reason) = response
                    .prompt_feedback
                    .as_ref()
                    .and_then(|feedback| feedback.block_reason.as_deref())
                {
                    tracing::info!(
                        event = "relay.blocked",
                        block_reason = reason,
                        "prompt blocked"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    event = "relay.decode_failed",
                    error = %err,
                    "skipping undecodable stream event"
                );
            }
        }
        true
    }
}

/// Wraps an already-buffered body so it reads like a stream.
pub fn single_chunk(body: Bytes) -> ByteStream {
    let (tx, rx) = mpsc::channel(1);
    if !body.is_empty() {
        let _ = tx.try_send(Ok(body));
    }
    rx
}

/// Spawns the relay task. `first` was already read while confirming the stream
/// and is written before anything else.
pub fn spawn_relay(first: Option<String>, mut reader: FragmentReader) -> ChatStream {
    let (tx, rx) = mpsc::channel::<Bytes>(RELAY_BUFFER);
    tokio::spawn(async move {
        let mut fragments = 0usize;
        if let Some(text) = first {
            if tx.send(Bytes::from(text)).await.is_err() {
                tracing::debug!(event = "relay.cancelled", fragments, "caller went away");
                return;
            }
            fragments += 1;
        }
        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!(event = "relay.cancelled", fragments, "caller went away");
                    return;
                }
                next = reader.next_fragment() => next,
            };
            match next {
                Some(Ok(text)) => {
                    if tx.send(Bytes::from(text)).await.is_err() {
                        tracing::debug!(event = "relay.cancelled", fragments, "caller went away");
                        return;
                    }
                    fragments += 1;
                }
                Some(Err(failure)) => {
                    tracing::warn!(
                        event = "relay.aborted",
                        fragments,
                        error = %failure,
                        "upstream stream failed after it was confirmed"
                    );
                    return;
                }
                None => {
                    match reader.finish_reason() {
                        Some(FinishReason::Stop) | None => {
                            tracing::debug!(event = "relay.completed", fragments, "stream finished");
                        }
                        Some(reason) => {
                            tracing::info!(
                                event = "relay.completed",
                                fragments,
                                finish_reason = ?reason,
                                "stream finished early"
                            );
                        }
                    }
                    return;
                }
            }
        }
    });
    rx
}
