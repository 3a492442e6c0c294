// Core modules
pub mod api;
pub mod config;
pub mod cycle;
pub mod execution;
pub mod indicators;
pub mod llm;
pub mod models;
pub mod notify;
pub mod scheduler;

// Re-export commonly used types
pub use cycle::{CycleReport, CycleSettings, TradingCycle};
pub use models::*;
pub use scheduler::{CycleRunner, CycleScheduler};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
