pub mod env;
pub mod error;
pub mod paths;

pub use error::GatewayError;
pub use paths::RuntimeDir;
