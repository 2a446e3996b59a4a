use serde::{Deserialize, Serialize};

/// One message in a chat conversation. `content` is kept as a raw JSON value
/// because upstreams increasingly accept multi-part content (text + image
/// blocks); adapters that need a plain string can call [`ChatMessage::text`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The normalized chat request every [`crate::Adapter`]-equivalent consumes.
/// Field names mirror the OpenAI-compatible wire shape; `stream` has already
/// been consumed by the router by the time an adapter sees this struct, but
/// is kept so converters that need to pick a stream-specific URL can see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Non-stream normalized chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn new(id: String, model: String, created: i64, choices: Vec<ChatChoice>) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created,
            model,
            choices,
            usage: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: u32,
    pub delta: ChatDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Streaming normalized chunk. `object` is always
/// `chat.completion.chunk`; `usage` is only populated on the terminal chunk
/// for upstreams that report it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    pub fn new(id: String, model: String, created: i64, choices: Vec<ChatChunkChoice>) -> Self {
        Self {
            id,
            object: "chat.completion.chunk".to_string(),
            created,
            model,
            choices,
            usage: None,
        }
    }

    pub fn delta_text(id: &str, model: &str, created: i64, index: u32, text: &str) -> Self {
        Self::new(
            id.to_string(),
            model.to_string(),
            created,
            vec![ChatChunkChoice {
                index,
                delta: ChatDelta {
                    role: None,
                    content: Some(text.to_string()),
                },
                finish_reason: None,
            }],
        )
    }

    pub fn finish(id: &str, model: &str, created: i64, index: u32, reason: &str) -> Self {
        Self::new(
            id.to_string(),
            model.to_string(),
            created,
            vec![ChatChunkChoice {
                index,
                delta: ChatDelta::default(),
                finish_reason: Some(reason.to_string()),
            }],
        )
    }
}

/// An in-band error chunk sent when a stream fails after the first byte has
/// already gone out: the HTTP status line is long since committed, so the
/// failure is delivered as a chunk followed by `[DONE]` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamErrorChunk {
    pub error: StreamErrorInner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamErrorInner {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A model descriptor as served by `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            created: 0,
            owned_by: owned_by.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelDescriptor>,
}

impl ModelList {
    pub fn new(data: Vec<ModelDescriptor>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_model() {
        let req = ChatRequest {
            model: "".to_string(),
            messages: vec![],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            user: None,
            stream: false,
        };
        assert!(req.validate().is_err());
    }
}
