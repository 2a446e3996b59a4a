pub mod config;
pub mod error_response;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod phase;
pub mod pool;
pub mod router;
pub mod state;
pub mod worker;

pub use config::SupervisorConfig;
pub use pool::{Pool, PoolConfig};
pub use router::build_router;
pub use state::AppState;
