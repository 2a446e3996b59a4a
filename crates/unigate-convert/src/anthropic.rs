use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use unigate_common::GatewayError;
use unigate_protocol::{ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, SseEvent, Usage};

use crate::converter::{Converter, Secrets, StreamDecoder};

/// Converter for Anthropic's Messages API: splits `system` out of the
/// message list, renames `stop` to `stop_sequences`, and normalizes the
/// `{content:[{type:"text", text}], usage:{input_tokens,output_tokens}}`
/// response shape back into the OpenAI-shaped [`ChatResponse`].
pub struct AnthropicConverter;

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[async_trait]
impl Converter for AnthropicConverter {
    fn build_request_url(&self, base_url: &str, _model: &str, _stream: bool) -> String {
        format!("{}/v1/messages", base_url.trim_end_matches('/'))
    }

    async fn build_request_headers(
        &self,
        secrets: &Secrets,
        _stream: bool,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        let key = secrets
            .get("api_key")
            .ok_or_else(|| GatewayError::AuthMintError("missing api_key secret".to_string()))?;
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(key).map_err(|e| GatewayError::AuthMintError(e.to_string()))?,
        );
        Ok(headers)
    }

    fn build_request_body(&self, request: &ChatRequest) -> Result<Bytes, GatewayError> {
        let mut system_texts = Vec::new();
        let mut messages = Vec::new();
        for message in &request.messages {
            if message.role == "system" {
                system_texts.push(message.text());
            } else {
                messages.push(AnthropicMessage {
                    role: message.role.clone(),
                    content: message.text(),
                });
            }
        }

        let body = AnthropicRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: if system_texts.is_empty() {
                None
            } else {
                Some(system_texts.join("\n"))
            },
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            stream: request.stream,
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| GatewayError::UpstreamProtocolError(e.to_string()))
    }

    fn parse_response(&self, body: &Bytes) -> Result<ChatResponse, GatewayError> {
        let parsed: AnthropicResponse = serde_json::from_slice(body).map_err(|e| {
            GatewayError::UpstreamProtocolError(format!("invalid upstream body: {e}"))
        })?;
        let text = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });
        Ok(ChatResponse {
            id: parsed.id,
            object: "chat.completion".to_string(),
            created: now_unix(),
            model: parsed.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: serde_json::Value::String(text),
                    name: None,
                },
                finish_reason: Some(map_stop_reason(parsed.stop_reason.as_deref())),
            }],
            usage,
        })
    }

    fn new_stream_decoder(&self, model: &str) -> Box<dyn StreamDecoder> {
        Box::new(AnthropicStreamDecoder {
            model: model.to_string(),
            message_id: String::new(),
            index: 0,
        })
    }
}

fn map_stop_reason(reason: Option<&str>) -> String {
    match reason {
        Some("end_turn") | Some("stop_sequence") => "stop".to_string(),
        Some("max_tokens") => "length".to_string(),
        Some(other) => other.to_string(),
        None => "stop".to_string(),
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct AnthropicStreamDecoder {
    model: String,
    message_id: String,
    index: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: AnthropicStreamMessage },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: AnthropicStreamDelta },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: AnthropicStreamStopDelta },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicStreamMessage {
    id: String,
}

#[derive(Deserialize)]
struct AnthropicStreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicStreamStopDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

impl StreamDecoder for AnthropicStreamDecoder {
    fn decode(&mut self, event: SseEvent) -> Result<Vec<ChatChunk>, GatewayError> {
        if event.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: AnthropicStreamEvent = serde_json::from_str(&event.data).map_err(|e| {
            GatewayError::UpstreamProtocolError(format!("invalid stream event: {e}"))
        })?;
        let created = now_unix();
        match parsed {
            AnthropicStreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                Ok(Vec::new())
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                let Some(text) = delta.text else {
                    return Ok(Vec::new());
                };
                Ok(vec![ChatChunk::delta_text(
                    &self.message_id,
                    &self.model,
                    created,
                    self.index,
                    &text,
                )])
            }
            AnthropicStreamEvent::MessageDelta { delta } => {
                let reason = map_stop_reason(delta.stop_reason.as_deref());
                Ok(vec![ChatChunk::finish(
                    &self.message_id,
                    &self.model,
                    created,
                    self.index,
                    &reason,
                )])
            }
            AnthropicStreamEvent::Other => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_non_stream_response() {
        let converter = AnthropicConverter;
        let body = Bytes::from(
            r#"{"id":"msg_1","model":"claude-3","content":[{"type":"text","text":"pong"}],"stop_reason":"end_turn","usage":{"input_tokens":3,"output_tokens":1}}"#,
        );
        let resp = converter.parse_response(&body).unwrap();
        assert_eq!(resp.choices[0].message.text(), "pong");
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn builds_body_splitting_system_message() {
        use unigate_protocol::ChatMessage;
        let converter = AnthropicConverter;
        let req = ChatRequest {
            model: "claude-3".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: serde_json::Value::String("be terse".to_string()),
                    name: None,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: serde_json::Value::String("hi".to_string()),
                    name: None,
                },
            ],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            user: None,
            stream: false,
        };
        let body = converter.build_request_body(&req).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["system"], "be terse");
        assert_eq!(value["messages"].as_array().unwrap().len(), 1);
        assert_eq!(value["max_tokens"], DEFAULT_MAX_TOKENS);
    }
}
