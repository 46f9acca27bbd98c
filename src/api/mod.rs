//! API Module
//!
//! Upstream wire types and the OpenAI-compatible translation layer.

pub mod gemini;
pub mod openai;

pub use gemini::{
    generate_content_url, GenerateContentRequest, GenerateContentResponse, GenerationParams,
};
pub use openai::{
    flatten_messages, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ErrorEnvelope,
    MessageContent, Usage,
};
