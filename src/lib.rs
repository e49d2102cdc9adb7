// Library exports for querygate
// The binary and the integration tests both build on these modules

pub mod error;
pub mod config;
pub mod engine;
pub mod mysql;
pub mod query;

// Re-export commonly used types
pub use error::{GateError, Result};
pub use config::Config;
pub use engine::{DataFusionEngine, QueryEngine};
pub use query::Handler;
