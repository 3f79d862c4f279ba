use serde::{Deserialize, Serialize};

use crate::gemini::types::JsonValue;

/// Error envelope returned by the Gemini API on non-2xx responses, and
/// occasionally as a `data:` payload inside an SSE stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiErrorBody {
    pub error: GeminiError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiError {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    /// Canonical status, e.g. `RESOURCE_EXHAUSTED` or `PERMISSION_DENIED`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<JsonValue>,
}

impl GeminiError {
    /// `reason` values of `ErrorInfo` details (e.g. `API_KEY_INVALID`,
    /// `SERVICE_DISABLED`).
    pub fn detail_reasons(&self) -> Vec<&str> {
        self.details
            .iter()
            .filter_map(|detail| detail.get("reason").and_then(JsonValue::as_str))
            .collect()
    }

    /// One line: message, then canonical status and detail reasons in
    /// parentheses when present.
    pub fn summary(&self) -> String {
        let mut tags: Vec<&str> = Vec::new();
        if let Some(status) = self.status.as_deref() {
            tags.push(status);
        }
        tags.extend(self.detail_reasons());
        if tags.is_empty() {
            self.message.clone()
        } else {
            format!("{} ({})", self.message, tags.join("; "))
        }
    }
}

impl GeminiErrorBody {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}
