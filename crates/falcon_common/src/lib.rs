pub mod config;
pub mod error;
pub mod lock_metrics;
pub mod types;
