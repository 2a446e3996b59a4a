use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use unigate_common::GatewayError;
use unigate_protocol::{ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, SseEvent, Usage};

use crate::converter::{Converter, Secrets, StreamDecoder};

/// Converter for Google's Gemini `generateContent` API: rewrites role
/// `assistant` to `model`, folds `system` messages into `systemInstruction`,
/// and resolves distinct stream/non-stream URL forms: `:generateContent`
/// for a single response, `:streamGenerateContent?alt=sse` for a stream.
pub struct GeminiConverter;

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "systemInstruction")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "generationConfig")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Default)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "topP")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "stopSequences")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

#[async_trait]
impl Converter for GeminiConverter {
    fn build_request_url(&self, base_url: &str, model: &str, stream: bool) -> String {
        let base = base_url.trim_end_matches('/');
        if stream {
            format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/v1beta/models/{model}:generateContent")
        }
    }

    async fn build_request_headers(
        &self,
        secrets: &Secrets,
        _stream: bool,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let key = secrets
            .get("api_key")
            .ok_or_else(|| GatewayError::AuthMintError("missing api_key secret".to_string()))?;
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(key).map_err(|e| GatewayError::AuthMintError(e.to_string()))?,
        );
        Ok(headers)
    }

    fn build_request_body(&self, request: &ChatRequest) -> Result<Bytes, GatewayError> {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for message in &request.messages {
            if message.role == "system" {
                system_parts.push(message.text());
                continue;
            }
            let role = if message.role == "assistant" {
                "model"
            } else {
                "user"
            };
            contents.push(GeminiContent {
                role: role.to_string(),
                parts: vec![GeminiPart {
                    text: message.text(),
                }],
            });
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: "system".to_string(),
                parts: vec![GeminiPart {
                    text: system_parts.join("\n"),
                }],
            })
        };

        let generation_config = GeminiGenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
        };

        let body = GeminiRequest {
            contents,
            system_instruction,
            generation_config: Some(generation_config),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| GatewayError::UpstreamProtocolError(e.to_string()))
    }

    fn parse_response(&self, body: &Bytes) -> Result<ChatResponse, GatewayError> {
        let parsed: GeminiResponse = serde_json::from_slice(body).map_err(|e| {
            GatewayError::UpstreamProtocolError(format!("invalid upstream body: {e}"))
        })?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::UpstreamProtocolError("no candidates".to_string()))?;
        let text = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });
        Ok(ChatResponse {
            id: format!("gemini-{}", uuid_like()),
            object: "chat.completion".to_string(),
            created: now_unix(),
            model: String::new(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: serde_json::Value::String(text),
                    name: None,
                },
                finish_reason: Some(map_finish_reason(candidate.finish_reason.as_deref())),
            }],
            usage,
        })
    }

    fn new_stream_decoder(&self, model: &str) -> Box<dyn StreamDecoder> {
        Box::new(GeminiStreamDecoder {
            model: model.to_string(),
            index: 0,
            id: format!("gemini-{}", uuid_like()),
        })
    }
}

fn map_finish_reason(reason: Option<&str>) -> String {
    match reason {
        Some("STOP") => "stop".to_string(),
        Some("MAX_TOKENS") => "length".to_string(),
        Some(other) => other.to_lowercase(),
        None => "stop".to_string(),
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn uuid_like() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

struct GeminiStreamDecoder {
    model: String,
    index: u32,
    id: String,
}

impl StreamDecoder for GeminiStreamDecoder {
    fn decode(&mut self, event: SseEvent) -> Result<Vec<ChatChunk>, GatewayError> {
        if event.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: GeminiResponse = serde_json::from_str(&event.data).map_err(|e| {
            GatewayError::UpstreamProtocolError(format!("invalid stream chunk: {e}"))
        })?;
        let created = now_unix();
        let mut chunks = Vec::new();
        for candidate in parsed.candidates {
            let text: String = candidate
                .content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect();
            if !text.is_empty() {
                chunks.push(ChatChunk::delta_text(
                    &self.id, &self.model, created, self.index, &text,
                ));
            }
            if let Some(reason) = candidate.finish_reason {
                chunks.push(ChatChunk::finish(
                    &self.id,
                    &self.model,
                    created,
                    self.index,
                    &map_finish_reason(Some(&reason)),
                ));
            }
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_assistant_role_to_model() {
        let converter = GeminiConverter;
        let req = ChatRequest {
            model: "gemini-pro".to_string(),
            messages: vec![
                ChatMessage {
                    role: "user".to_string(),
                    content: serde_json::Value::String("hi".to_string()),
                    name: None,
                },
                ChatMessage {
                    role: "assistant".to_string(),
                    content: serde_json::Value::String("hello".to_string()),
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
        assert_eq!(value["contents"][1]["role"], "model");
    }

    #[test]
    fn stream_url_uses_sse_form() {
        let converter = GeminiConverter;
        let url = converter.build_request_url("https://example.com", "gemini-pro", true);
        assert!(url.ends_with(":streamGenerateContent?alt=sse"));
    }
}
