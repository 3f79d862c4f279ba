use bytes::Bytes;

use tutorgate_protocol::gemini::StreamGenerateContentRequest;

use crate::headers::header_set;
use crate::{HttpMethod, ProviderError, ProviderResult, UpstreamHttpRequest};

pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Request shape for the Generative Language API with an API key.
#[derive(Debug, Clone)]
pub struct GeminiEndpoint {
    base_url: String,
}

impl GeminiEndpoint {
    pub fn new(base_url: impl Into<String>) -> ProviderResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ProviderError::InvalidConfig(format!(
                "base_url must be an http(s) URL, got {base_url:?}"
            )));
        }
        Ok(Self { base_url })
    }

    /// `POST {base}/v1beta/models/{model}:streamGenerateContent?alt=sse`,
    /// authenticated with `api_key`.
    pub fn build_stream_generate(
        &self,
        api_key: &str,
        req: &StreamGenerateContentRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let url = format!(
            "{}/v1beta/{}:streamGenerateContent?alt=sse",
            self.base_url,
            req.path.resource_name()
        );
        let body =
            serde_json::to_vec(&req.body).map_err(|err| ProviderError::Encode(err.to_string()))?;

        let mut headers = Vec::new();
        header_set(&mut headers, API_KEY_HEADER, api_key);
        header_set(&mut headers, "content-type", "application/json");
        header_set(&mut headers, "accept", "text/event-stream");

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(body)),
            is_stream: true,
        })
    }
}
