pub mod config;
pub mod error;
pub mod flow;
pub mod types;

pub use config::{ConfigLoader, EngineConfig, FlowConfig, StorageConfig};
pub use error::AppError;
pub use types::*;
