use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::time::Instant;
use unigate_common::GatewayError;
use unigate_protocol::sse::SseParser;
use unigate_protocol::{ChatChunk, ChatRequest, ChatResponse, ModelDescriptor};

use crate::adapter::{remaining, Adapter, ChatStream};
use crate::classify_transport;

/// Forwards the normalized request verbatim to `{base_url}/chat/completions`
/// with `Authorization: Bearer <key>`, after overwriting `model` with the
/// upstream's own name. Used for upstreams that already speak the OpenAI
/// wire format exactly and need no header games.
pub struct PassThroughAdapter {
    client: reqwest::Client,
    base_url: String,
    upstream_model: String,
    local_model_id: String,
    api_key: Option<String>,
}

impl PassThroughAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        upstream_model: impl Into<String>,
        local_model_id: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            upstream_model: upstream_model.into(),
            local_model_id: local_model_id.into(),
            api_key,
        }
    }

    fn upstream_request(&self, request: &ChatRequest, stream: bool) -> ChatRequest {
        let mut upstream = request.clone();
        upstream.model = self.upstream_model.clone();
        upstream.stream = stream;
        upstream
    }

    fn build_request(
        &self,
        body: &ChatRequest,
        deadline: Instant,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(url)
            .timeout(remaining(deadline))
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl Adapter for PassThroughAdapter {
    async fn chat(&self, request: &ChatRequest, deadline: Instant) -> Result<ChatResponse, GatewayError> {
        let upstream_request = self.upstream_request(request, false);
        let response = self
            .build_request(&upstream_request, deadline)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(crate::upstream_status_error(status.as_u16(), detail));
        }
        let body = response.bytes().await.map_err(classify_transport)?;
        serde_json::from_slice(&body)
            .map_err(|e| GatewayError::UpstreamProtocolError(format!("invalid upstream body: {e}")))
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        deadline: Instant,
    ) -> Result<ChatStream, GatewayError> {
        let upstream_request = self.upstream_request(request, true);
        let response = self
            .build_request(&upstream_request, deadline)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(crate::upstream_status_error(status.as_u16(), detail));
        }

        let mut byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut parser = SseParser::default();
            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(classify_transport(e));
                        return;
                    }
                };
                for event in parser.push_bytes(&bytes) {
                    if event.data.trim() == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<ChatChunk>(&event.data) {
                        Ok(parsed) => yield Ok(parsed),
                        Err(e) => {
                            yield Err(GatewayError::UpstreamProtocolError(format!(
                                "invalid stream chunk: {e}"
                            )));
                            return;
                        }
                    }
                }
            }
            for event in parser.finish() {
                if let Ok(parsed) = serde_json::from_str::<ChatChunk>(&event.data) {
                    yield Ok(parsed);
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn is_available(&self) -> bool {
        !self.base_url.is_empty() && !self.upstream_model.is_empty()
    }

    fn model_info(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.local_model_id.clone(), "pass_through")
    }
}
