//! Stevedore Core - Foundational Types
//!
//! Error and configuration types shared by the image runtime and the CRI
//! image service.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{LogLevel, PullConfig};
pub use error::{ImageError, Result};

/// Stevedore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
