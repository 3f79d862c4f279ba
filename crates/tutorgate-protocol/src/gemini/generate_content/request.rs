use serde::{Deserialize, Serialize};

use crate::gemini::types::Content;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateContentPath {
    /// Bare model id (`gemini-2.5-flash`) or the `models/{model}` form.
    pub model: String,
}

impl GenerateContentPath {
    /// Always `models/{model}`, whichever form was configured.
    pub fn resource_name(&self) -> String {
        let model = self.model.trim().trim_start_matches('/');
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequestBody {
    /// Required. The content of the current conversation with the model.
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct StreamGenerateContentRequest {
    pub path: GenerateContentPath,
    pub body: GenerateContentRequestBody,
}
