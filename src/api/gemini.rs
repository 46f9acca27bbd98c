//! Gemini Wire Types
//!
//! Request and response bodies of the `generateContent` endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Optional sampling parameters forwarded to the upstream API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_output_tokens.is_none()
    }

    /// Pick the recognised sampling keys out of loosely-typed dispatch params
    pub fn from_map(params: &Map<String, Value>) -> Self {
        let temperature = params
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|t| t as f32);
        let max_output_tokens = params
            .get("max_tokens")
            .or_else(|| params.get("max_output_tokens"))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());

        Self {
            temperature,
            max_output_tokens,
        }
    }
}

/// Body of a `generateContent` call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    /// Single-turn request carrying `prompt` as its only text part
    pub fn from_prompt(prompt: &str, params: &GenerationParams) -> Self {
        let generation_config = if params.is_empty() {
            None
        } else {
            Some(GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            })
        };

        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Successful `generateContent` response, as far as the proxy reads it
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

impl GenerateContentResponse {
    /// `candidates[0].content.parts[0].text`, if present
    pub fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }
}

/// URL of the `generateContent` method for `model`
///
/// The credential travels as the `key` query parameter and is added by the caller.
pub fn generate_content_url(endpoint: &str, model: &str) -> String {
    format!(
        "{}/models/{}:generateContent",
        endpoint.trim_end_matches('/'),
        model
    )
}
