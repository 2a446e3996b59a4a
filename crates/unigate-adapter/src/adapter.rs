use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::time::Instant;
use unigate_protocol::{ChatChunk, ChatRequest, ChatResponse, ModelDescriptor};

use unigate_common::GatewayError;

/// A finite, non-restartable sequence of normalized chunks. Dropping the
/// stream before it is exhausted must release the upstream connection
/// within the adapter's own deadline.
pub type ChatStream = BoxStream<'static, Result<ChatChunk, GatewayError>>;

/// One upstream dispatch strategy. Owned exclusively by the Registry; its
/// lifetime ends when the Registry is replaced by a reload.
///
/// Retry/breaker/rate-limit wrapping happens at the call site (the Router),
/// not inside the adapter itself — an adapter only knows how to make one
/// attempt.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn chat(&self, request: &ChatRequest, deadline: Instant) -> Result<ChatResponse, GatewayError>;

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        deadline: Instant,
    ) -> Result<ChatStream, GatewayError>;

    /// Synchronous configuration check: all required secrets present, file
    /// exists for subprocess, etc. Evaluated once at Registry load time.
    fn is_available(&self) -> bool;

    fn model_info(&self) -> ModelDescriptor;
}

pub(crate) fn remaining(deadline: Instant) -> std::time::Duration {
    deadline.saturating_duration_since(Instant::now())
}
