// Ledger lookup boundary
pub mod client;

// Startup configuration
pub mod config;

// Shared domain types
pub mod core;

// Log subscription and admission queue
pub mod ingest;

// Dispatch, filtering, and detection storage
pub mod pipeline;

// Query endpoint
pub mod server;

// Re-export commonly used types for convenience
pub use crate::core::types::{Candidate, Detection};
pub use config::MonitorConfig;
pub use pipeline::DetectionStore;
