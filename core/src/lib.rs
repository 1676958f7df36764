//! Yolo Core - Foundational Types
//!
//! Error taxonomy and explicit configuration shared by the runtime
//! and the CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{BuildOptions, LayerFailurePolicy, PublishMode, YoloConfig};
pub use error::{Result, YoloError};

/// Yolo version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
