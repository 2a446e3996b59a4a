//! Protocol converters: translate the normalized chat wire types to and
//! from each upstream vendor's native request/response shape.

pub mod anthropic;
pub mod converter;
pub mod gemini;
pub mod openai;
pub mod signing;

pub use anthropic::AnthropicConverter;
pub use converter::{Converter, ConverterRegistry, Secrets, StreamDecoder};
pub use gemini::GeminiConverter;
pub use openai::OpenAiCompatConverter;
pub use signing::{hmac_sha256_hex, SignedGenericConverter};
