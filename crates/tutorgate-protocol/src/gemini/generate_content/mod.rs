pub mod request;
pub mod response;

pub use request::{
    GenerateContentPath, GenerateContentRequestBody, GenerationConfig,
    StreamGenerateContentRequest,
};
pub use response::{Candidate, FinishReason, GenerateContentResponse, PromptFeedback, UsageMetadata};
