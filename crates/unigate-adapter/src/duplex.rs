use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use unigate_common::GatewayError;
use unigate_protocol::{ChatChunk, ChatRequest, ChatResponse, ModelDescriptor, Usage};

use crate::adapter::{remaining, Adapter, ChatStream};

type HmacSha256 = Hmac<Sha256>;

const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Establishes a full-duplex socket to the upstream, performs a signed
/// handshake (HMAC-SHA256 over `host\ndate\npath`), then sends and receives
/// length-prefixed JSON frames. Always operates in stream mode internally;
/// non-stream callers aggregate the yielded chunks.
pub struct DuplexSocketAdapter {
    addr: String,
    host: String,
    path: String,
    key_id: String,
    signing_key: String,
    local_model_id: String,
}

impl DuplexSocketAdapter {
    pub fn new(
        addr: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        key_id: impl Into<String>,
        signing_key: impl Into<String>,
        local_model_id: impl Into<String>,
    ) -> Self {
        Self {
            addr: addr.into(),
            host: host.into(),
            path: path.into(),
            key_id: key_id.into(),
            signing_key: signing_key.into(),
            local_model_id: local_model_id.into(),
        }
    }

    fn sign(&self, date: &str) -> Result<String, GatewayError> {
        let canonical = format!("{}\n{}\n{}", self.host, date, self.path);
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .map_err(|e| GatewayError::AuthMintError(e.to_string()))?;
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<(), GatewayError> {
        let date = httpdate_now();
        let signature = self.sign(&date)?;
        let handshake = serde_json::json!({
            "key_id": self.key_id,
            "date": date,
            "path": self.path,
            "signature": signature,
        });
        write_frame(stream, handshake.to_string().as_bytes()).await?;

        let ack = read_frame(stream).await?;
        let ack: serde_json::Value = serde_json::from_slice(&ack)
            .map_err(|e| GatewayError::UpstreamProtocolError(format!("invalid handshake ack: {e}")))?;
        if ack.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(GatewayError::UpstreamAuth {
                status: 401,
                detail: ack.to_string(),
            });
        }
        Ok(())
    }

    async fn open_stream(
        &self,
        request: &ChatRequest,
        deadline: Instant,
    ) -> Result<TcpStream, GatewayError> {
        let mut stream = tokio::time::timeout(remaining(deadline), TcpStream::connect(&self.addr))
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| GatewayError::UpstreamTransient(format!("connect failed: {e}")))?;

        self.handshake(&mut stream).await?;

        let body = serde_json::to_vec(request)
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        write_frame(&mut stream, &body).await?;
        Ok(stream)
    }
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), GatewayError> {
    stream
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| GatewayError::UpstreamTransient(format!("write failed: {e}")))?;
    stream
        .write_all(payload)
        .await
        .map_err(|e| GatewayError::UpstreamTransient(format!("write failed: {e}")))?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, GatewayError> {
    let len = stream
        .read_u32()
        .await
        .map_err(|e| GatewayError::UpstreamTransient(format!("read failed: {e}")))?;
    if len > MAX_FRAME_BYTES {
        return Err(GatewayError::UpstreamProtocolError(format!(
            "frame too large: {len} bytes"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| GatewayError::UpstreamTransient(format!("read failed: {e}")))?;
    Ok(buf)
}

fn httpdate_now() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default()
}

#[async_trait]
impl Adapter for DuplexSocketAdapter {
    async fn chat(&self, request: &ChatRequest, deadline: Instant) -> Result<ChatResponse, GatewayError> {
        let mut stream = self.chat_stream(request, deadline).await?;

        use futures_util::StreamExt;
        let mut text = String::new();
        let mut finish_reason = "stop".to_string();
        let mut id = format!("duplex-{}", self.local_model_id);
        let mut created = 0;
        let mut usage: Option<Usage> = None;
        while let Some(item) = stream.next().await {
            let chunk = item?;
            id = chunk.id.clone();
            created = chunk.created;
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    text.push_str(content);
                }
                if let Some(reason) = &choice.finish_reason {
                    finish_reason = reason.clone();
                }
            }
        }

        Ok(ChatResponse {
            id,
            object: "chat.completion".to_string(),
            created,
            model: self.local_model_id.clone(),
            choices: vec![unigate_protocol::ChatChoice {
                index: 0,
                message: unigate_protocol::ChatMessage {
                    role: "assistant".to_string(),
                    content: serde_json::Value::String(text),
                    name: None,
                },
                finish_reason: Some(finish_reason),
            }],
            usage,
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        deadline: Instant,
    ) -> Result<ChatStream, GatewayError> {
        let mut stream = self.open_stream(request, deadline).await?;

        let output = async_stream::stream! {
            loop {
                let frame = match read_frame(&mut stream).await {
                    Ok(f) => f,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if frame.is_empty() {
                    return;
                }
                let parsed: Result<ChatChunk, _> = serde_json::from_slice(&frame);
                match parsed {
                    Ok(chunk) => {
                        let done = chunk
                            .choices
                            .iter()
                            .any(|c| c.finish_reason.is_some());
                        yield Ok(chunk);
                        if done {
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(GatewayError::UpstreamProtocolError(format!(
                            "invalid duplex frame: {e}"
                        )));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(output))
    }

    fn is_available(&self) -> bool {
        !self.addr.is_empty() && !self.signing_key.is_empty()
    }

    fn model_info(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.local_model_id.clone(), "duplex_socket")
    }
}
