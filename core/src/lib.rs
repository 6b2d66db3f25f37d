// Shared building blocks for the process-assist crates:
// - Configuration loading
// - Shared error types

// Export config module - Configuration loading
pub mod config;
pub use config::*;

// Export errors module - Shared error types
pub mod errors;
pub use errors::*;
