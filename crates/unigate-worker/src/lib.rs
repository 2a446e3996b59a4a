//! The Router + HTTP Surface and Worker Process components: terminates the
//! OpenAI-compatible API on one port and dispatches through the Registry's
//! adapters, governed by the retry/breaker/rate-limiter layer.

pub mod config;
pub mod dispatch;
pub mod error_response;
pub mod handlers;
pub mod heartbeat;
pub mod router;
pub mod state;

pub use config::WorkerConfig;
pub use router::build_router;
pub use state::WorkerState;
