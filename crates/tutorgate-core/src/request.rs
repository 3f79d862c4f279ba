use bytes::Bytes;

use tutorgate_protocol::gemini::Content;

use crate::error::DispatchError;

/// Uploaded picture of the problem being asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Bytes,
}

/// One inbound chat turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub prompt_text: String,
    /// Only used when `history` is empty.
    pub image: Option<InlineImage>,
    /// Prior turns in Gemini wire format; empty on the first turn.
    pub history: Vec<Content>,
}

impl ChatRequest {
    pub fn is_first_turn(&self) -> bool {
        self.history.is_empty()
    }

    pub fn has_prompt(&self) -> bool {
        !self.prompt_text.trim().is_empty()
    }

    /// The image only counts on the first turn; follow-ups need a prompt.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.has_prompt() {
            return Ok(());
        }
        if !self.is_first_turn() {
            return Err(DispatchError::InvalidRequest(
                "a follow-up question needs a prompt".to_string(),
            ));
        }
        if self.image.is_some() {
            Ok(())
        } else {
            Err(DispatchError::InvalidRequest(
                "a prompt or an image is required".to_string(),
            ))
        }
    }
}
