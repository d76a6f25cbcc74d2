pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::{Config, EngineConfig};
pub use error::{AppError, AppResult};
pub use services::SyncEngine;
