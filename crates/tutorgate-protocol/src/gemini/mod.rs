pub mod error;
pub mod generate_content;
pub mod types;

pub use error::{GeminiError, GeminiErrorBody};
pub use generate_content::{
    Candidate, FinishReason, GenerateContentPath, GenerateContentRequestBody,
    GenerateContentResponse, GenerationConfig, PromptFeedback, StreamGenerateContentRequest,
    UsageMetadata,
};
pub use types::{Blob, Content, ContentRole, JsonValue, Part};
