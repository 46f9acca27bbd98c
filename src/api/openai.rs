//! OpenAI-Compatible Translation
//!
//! Turns chat-completion requests into a single prompt for the upstream API and
//! wraps generated text back into the chat-completion response shape.

use crate::api::gemini::GenerationParams;
use crate::error::{ProxyError, Result};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

const DEFAULT_CHAT_MODEL: &str = "gemini-2.0-flash-exp";

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", "assistant", or anything else
    #[serde(default = "default_role")]
    pub role: String,

    /// Missing or `null` content reads as empty text
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: MessageContent,
}

fn default_role() -> String {
    "user".to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<MessageContent, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<MessageContent>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(content.to_string()),
        }
    }
}

/// Message content - can be a simple string or array of parts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple string content
    Text(String),

    /// Array of content parts
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    /// Convert to string (concatenating text parts if needed)
    pub fn to_string_content(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Other => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A content part; only text parts survive flattening
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl ChatCompletionRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }

    /// The conversation flattened into one prompt
    pub fn prompt(&self) -> Result<String> {
        if self.messages.is_empty() {
            return Err(ProxyError::InvalidRequest(
                "messages array is required".to_string(),
            ));
        }
        Ok(flatten_messages(&self.messages))
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: Some(self.temperature),
            max_output_tokens: Some(self.max_tokens),
        }
    }
}

/// Join messages into one newline-separated prompt with role prefixes
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|msg| {
            let content = msg.content.to_string_content();
            match msg.role.as_str() {
                "system" => format!("System: {}", content),
                "user" => format!("User: {}", content),
                "assistant" => format!("Assistant: {}", content),
                _ => content,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

/// A choice in the completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
}

/// Token usage, approximated by whitespace-separated word counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

impl ChatCompletionResponse {
    /// Wrap generated `text` for `prompt` as a single-choice completion
    pub fn from_generation(model: &str, prompt: &str, text: &str) -> Self {
        let now = Utc::now();
        let nanos = now.timestamp_nanos_opt().unwrap_or_default();
        let hex = format!("{:016x}", nanos);
        let prompt_tokens = word_count(prompt);
        let completion_tokens = word_count(text);

        Self {
            id: format!("chatcmpl-{}", &hex[hex.len() - 10..]),
            object: "chat.completion".to_string(),
            created: now.timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: text.to_string(),
                },
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        }
    }

    /// Get the first message content
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// OpenAI-style error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl From<&ProxyError> for ErrorEnvelope {
    fn from(err: &ProxyError) -> Self {
        let error_type = match err {
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            _ => "server_error",
        };
        Self {
            error: ErrorBody {
                message: err.to_string(),
                error_type: error_type.to_string(),
                param: None,
                code: None,
            },
        }
    }
}
