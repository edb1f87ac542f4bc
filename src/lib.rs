pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use commands::{CommandError, CommandResult, EngineState};
pub use config::EngineConfig;
pub use error::{AppError, AppResult};
