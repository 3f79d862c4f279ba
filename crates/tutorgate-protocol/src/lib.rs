//! Wire types for the Gemini `generateContent` family and the SSE framing used
//! by `streamGenerateContent?alt=sse`.

pub mod gemini;
pub mod sse;
