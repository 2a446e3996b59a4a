use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use unigate_common::GatewayError;
use unigate_protocol::{ChatChunk, ChatRequest, ChatResponse, SseEvent};

use crate::converter::{Converter, Secrets, StreamDecoder};

/// Custom-HTTP converter for upstreams that already speak the
/// OpenAI-compatible wire format but need header handling the
/// [`crate::Adapter`] pass-through variant does not provide (e.g. a
/// non-Bearer auth scheme, or a base URL that is not a literal
/// `{base_url}/chat/completions`).
pub struct OpenAiCompatConverter;

#[async_trait]
impl Converter for OpenAiCompatConverter {
    fn build_request_url(&self, base_url: &str, _model: &str, _stream: bool) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    async fn build_request_headers(
        &self,
        secrets: &Secrets,
        _stream: bool,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        if let Some(key) = secrets.get("api_key") {
            let value = format!("Bearer {key}");
            headers.insert(
                "authorization",
                HeaderValue::from_str(&value)
                    .map_err(|e| GatewayError::AuthMintError(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    fn build_request_body(&self, request: &ChatRequest) -> Result<Bytes, GatewayError> {
        serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(|e| GatewayError::UpstreamProtocolError(e.to_string()))
    }

    fn parse_response(&self, body: &Bytes) -> Result<ChatResponse, GatewayError> {
        serde_json::from_slice(body)
            .map_err(|e| GatewayError::UpstreamProtocolError(format!("invalid upstream body: {e}")))
    }

    fn new_stream_decoder(&self, _model: &str) -> Box<dyn StreamDecoder> {
        Box::new(OpenAiStreamDecoder)
    }
}

struct OpenAiStreamDecoder;

impl StreamDecoder for OpenAiStreamDecoder {
    fn decode(&mut self, event: SseEvent) -> Result<Vec<ChatChunk>, GatewayError> {
        if event.data.trim() == "[DONE]" {
            return Ok(Vec::new());
        }
        let chunk: ChatChunk = serde_json::from_str(&event.data).map_err(|e| {
            GatewayError::UpstreamProtocolError(format!("invalid stream chunk: {e}"))
        })?;
        Ok(vec![chunk])
    }
}
