use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use unigate_common::GatewayError;
use unigate_protocol::{ChatChunk, ChatRequest, ChatResponse, SseEvent};

/// Resolved secrets for one model entry (API keys, signing keys, etc.),
/// already passed through `ENV:` resolution by the Registry.
pub type Secrets = HashMap<String, String>;

/// Per-stream decoder state. A converter hands out a fresh decoder for
/// every `chat_stream` call because the SSE buffering state (partial
/// frames, in-progress tool-call accumulation) is not shareable across
/// concurrent streams: a decoder is never restarted mid-stream.
pub trait StreamDecoder: Send {
    /// Decode one upstream SSE event into zero or more normalized chunks.
    fn decode(&mut self, event: SseEvent) -> Result<Vec<ChatChunk>, GatewayError>;

    /// Flush any buffered partial state once the upstream stream ends.
    fn finish(&mut self) -> Vec<ChatChunk> {
        Vec::new()
    }
}

/// Per-vendor translation between the normalized wire format and an
/// upstream's native protocol. Implementations are
/// stateless aside from a cached auth token, so one converter instance is
/// shared across all calls for a model.
#[async_trait]
pub trait Converter: Send + Sync {
    /// `{model}`/`{version}` placeholder expansion, with stream vs
    /// non-stream URL forms resolved as needed (e.g. Gemini's
    /// `:generateContent` vs `:streamGenerateContent?alt=sse`).
    fn build_request_url(&self, base_url: &str, model: &str, stream: bool) -> String;

    /// Build upstream auth headers. Async because token-issuing providers
    /// mint/refresh a cached token here, with a refresh lead time so a
    /// token doesn't expire mid-request.
    async fn build_request_headers(
        &self,
        secrets: &Secrets,
        stream: bool,
    ) -> Result<HeaderMap, GatewayError>;

    fn build_request_body(&self, request: &ChatRequest) -> Result<Bytes, GatewayError>;

    fn parse_response(&self, body: &Bytes) -> Result<ChatResponse, GatewayError>;

    fn new_stream_decoder(&self, model: &str) -> Box<dyn StreamDecoder>;
}

/// Maps a `request_format` tag (from the model config file) to a converter
/// constructor. Adding a provider means adding one entry here — no other
/// code changes.
pub struct ConverterRegistry {
    factories: HashMap<String, Box<dyn Fn() -> Box<dyn Converter> + Send + Sync>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("openai_compat", || Box::new(crate::openai::OpenAiCompatConverter));
        registry.register("anthropic", || Box::new(crate::anthropic::AnthropicConverter));
        registry.register("gemini", || Box::new(crate::gemini::GeminiConverter));
        registry.register("signed_generic", || {
            Box::new(crate::signing::SignedGenericConverter::default())
        });
        registry
    }
}

impl ConverterRegistry {
    pub fn register(
        &mut self,
        tag: &str,
        factory: impl Fn() -> Box<dyn Converter> + Send + Sync + 'static,
    ) {
        self.factories.insert(tag.to_string(), Box::new(factory));
    }

    pub fn build(&self, tag: &str) -> Option<Box<dyn Converter>> {
        self.factories.get(tag).map(|factory| factory())
    }
}
