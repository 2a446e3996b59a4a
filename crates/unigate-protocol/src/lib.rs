pub mod chat;
pub mod sse;

pub use chat::{
    ChatChoice, ChatChunk, ChatChunkChoice, ChatDelta, ChatMessage, ChatRequest, ChatResponse,
    ModelDescriptor, ModelList, StreamErrorChunk, StreamErrorInner, Usage,
};
pub use sse::{SseEvent, SseParser};
