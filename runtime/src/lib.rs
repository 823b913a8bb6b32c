//! Stevedore Runtime - image collaborators.
//!
//! Registry access, short-name resolution and the local image store that
//! the CRI image service drives.

#![allow(clippy::result_large_err)]

pub mod oci;

// Re-export common types
pub use oci::{ImageRecord, ImageServer, OciImageServer, RemoteHandle};
pub use oci::{ImageReference, ImageStore, RegistryAuth, RegistryClient, RemoteImage, StoredImage};

/// Stevedore Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
