use base64::Engine;

use tutorgate_common::DEFAULT_MAX_OUTPUT_TOKENS;
use tutorgate_protocol::gemini::{
    Content, GenerateContentPath, GenerateContentRequestBody, GenerationConfig, Part,
    StreamGenerateContentRequest,
};

use crate::request::ChatRequest;

/// Persona sent as the first text part of every new conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a patient, encouraging tutor. \
The student has shared a problem, possibly as a photo. First restate what the \
problem asks, then guide the student step by step, explaining the reasoning \
behind each step instead of only giving the final answer. Write math in LaTeX \
($...$ inline, $$...$$ for display). If the image is unreadable or the question \
is ambiguous, say so and ask a clarifying question. Answer in the language the \
student uses.";

#[derive(Debug, Clone)]
pub struct PayloadConfig {
    pub model: String,
    pub max_output_tokens: u32,
    pub system_prompt: String,
}

impl PayloadConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Provider payload for one turn. Pure; the retry path calls it again with the
/// same request and gets an identical payload.
///
/// First turn: `[persona, image?, prompt]`. Later turns: `[prompt]` appended to
/// the verbatim history; the image is never re-sent.
pub fn build_generate_request(
    request: &ChatRequest,
    config: &PayloadConfig,
) -> StreamGenerateContentRequest {
    let mut parts = Vec::new();
    if request.is_first_turn() {
        parts.push(Part::text(config.system_prompt.clone()));
        if let Some(image) = &request.image {
            let data = base64::engine::general_purpose::STANDARD.encode(&image.data);
            parts.push(Part::inline_data(image.mime_type.clone(), data));
        }
    }
    // Gemini rejects empty text parts; an image-only turn carries no prompt part.
    if request.has_prompt() {
        parts.push(Part::text(request.prompt_text.clone()));
    }

    let mut contents = request.history.clone();
    contents.push(Content::user(parts));

    StreamGenerateContentRequest {
        path: GenerateContentPath {
            model: config.model.clone(),
        },
        body: GenerateContentRequestBody {
            contents,
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(config.max_output_tokens),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tutorgate_protocol::gemini::ContentRole;

    use super::*;
    use crate::request::InlineImage;

    fn config() -> PayloadConfig {
        PayloadConfig {
            model: "gemini-2.5-flash".to_string(),
            max_output_tokens: 1024,
            system_prompt: "be a tutor".to_string(),
        }
    }

    fn image() -> InlineImage {
        InlineImage {
            mime_type: "image/png".to_string(),
            data: Bytes::from_static(b"\x89PNG"),
        }
    }

    #[test]
    fn first_turn_has_persona_image_and_prompt() {
        let request = ChatRequest {
            prompt_text: "solve for x".to_string(),
            image: Some(image()),
            history: Vec::new(),
        };
        let built = build_generate_request(&request, &config());
        assert_eq!(built.body.contents.len(), 1);

        let turn = &built.body.contents[0];
        assert_eq!(turn.role, Some(ContentRole::User));
        assert_eq!(turn.parts.len(), 3);
        assert_eq!(turn.parts[0].text.as_deref(), Some("be a tutor"));
        let blob = turn.parts[1].inline_data.as_ref().expect("image part");
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, "iVBORw==");
        assert_eq!(turn.parts[2].text.as_deref(), Some("solve for x"));
        assert_eq!(
            built
                .body
                .generation_config
                .as_ref()
                .and_then(|c| c.max_output_tokens),
            Some(1024)
        );
    }

    #[test]
    fn follow_up_turn_never_reattaches_image() {
        let history = vec![
            Content::user(vec![Part::text("be a tutor"), Part::text("solve for x")]),
            Content {
                parts: vec![Part::text("x = 2")],
                role: Some(ContentRole::Model),
            },
        ];
        let request = ChatRequest {
            prompt_text: "why?".to_string(),
            image: Some(image()),
            history: history.clone(),
        };
        let built = build_generate_request(&request, &config());
        assert_eq!(built.body.contents.len(), 3);
        assert_eq!(&built.body.contents[..2], &history[..]);
        let turn = &built.body.contents[2];
        assert_eq!(turn.parts, vec![Part::text("why?")]);
        assert!(
            built
                .body
                .contents
                .iter()
                .flat_map(|c| &c.parts)
                .all(|p| p.inline_data.is_none())
        );
    }

    #[test]
    fn image_only_first_turn_has_no_empty_text_part() {
        let request = ChatRequest {
            prompt_text: "   ".to_string(),
            image: Some(image()),
            history: Vec::new(),
        };
        let built = build_generate_request(&request, &config());
        let parts = &built.body.contents[0].parts;
        assert_eq!(parts.len(), 2);
        assert!(parts[1].inline_data.is_some());
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let request = ChatRequest {
            prompt_text: "again".to_string(),
            image: Some(image()),
            history: Vec::new(),
        };
        let first = build_generate_request(&request, &config());
        let second = build_generate_request(&request, &config());
        assert_eq!(first.body, second.body);
    }
}
