use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::time::Instant;
use unigate_common::GatewayError;
use unigate_convert::{Converter, Secrets};
use unigate_protocol::sse::SseParser;
use unigate_protocol::{ChatChunk, ChatRequest, ChatResponse, ModelDescriptor};

use crate::adapter::{remaining, Adapter, ChatStream};
use crate::classify_transport;

/// Uses a [`Converter`] to build the upstream URL/headers/body, posts, and
/// normalizes the response back. Stream mode consumes the upstream's SSE
/// body and yields chunks via the converter's own stream decoder.
pub struct CustomHttpAdapter {
    client: reqwest::Client,
    converter: Arc<dyn Converter>,
    base_url: String,
    secrets: Secrets,
    local_model_id: String,
    upstream_model: String,
}

impl CustomHttpAdapter {
    pub fn new(
        client: reqwest::Client,
        converter: Arc<dyn Converter>,
        base_url: impl Into<String>,
        secrets: Secrets,
        local_model_id: impl Into<String>,
        upstream_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            converter,
            base_url: base_url.into(),
            secrets,
            local_model_id: local_model_id.into(),
            upstream_model: upstream_model.into(),
        }
    }

    fn upstream_request(&self, request: &ChatRequest, stream: bool) -> ChatRequest {
        let mut upstream = request.clone();
        upstream.model = self.upstream_model.clone();
        upstream.stream = stream;
        upstream
    }
}

#[async_trait]
impl Adapter for CustomHttpAdapter {
    async fn chat(&self, request: &ChatRequest, deadline: Instant) -> Result<ChatResponse, GatewayError> {
        let upstream_request = self.upstream_request(request, false);
        let url = self
            .converter
            .build_request_url(&self.base_url, &self.upstream_model, false);
        let headers = self
            .converter
            .build_request_headers(&self.secrets, false)
            .await?;
        let body = self.converter.build_request_body(&upstream_request)?;

        let response = self
            .client
            .post(url)
            .timeout(remaining(deadline))
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        let response_body = response.bytes().await.map_err(classify_transport)?;
        if !status.is_success() {
            let detail = String::from_utf8_lossy(&response_body).to_string();
            return Err(crate::upstream_status_error(status.as_u16(), detail));
        }
        self.converter.parse_response(&response_body)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        deadline: Instant,
    ) -> Result<ChatStream, GatewayError> {
        let upstream_request = self.upstream_request(request, true);
        let url = self
            .converter
            .build_request_url(&self.base_url, &self.upstream_model, true);
        let headers = self
            .converter
            .build_request_headers(&self.secrets, true)
            .await?;
        let body = self.converter.build_request_body(&upstream_request)?;

        let response = self
            .client
            .post(url)
            .timeout(remaining(deadline))
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(crate::upstream_status_error(status.as_u16(), detail));
        }

        let mut decoder = self.converter.new_stream_decoder(&self.local_model_id);
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
                    match decoder.decode(event) {
                        Ok(decoded) => {
                            for chunk in decoded {
                                yield Ok::<ChatChunk, GatewayError>(chunk);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            for event in parser.finish() {
                if let Ok(decoded) = decoder.decode(event) {
                    for chunk in decoded {
                        yield Ok(chunk);
                    }
                }
            }
            for chunk in decoder.finish() {
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(stream))
    }

    fn is_available(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn model_info(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.local_model_id.clone(), "custom_http")
    }
}
