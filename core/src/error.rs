use thiserror::Error;

/// Errors raised by image collaborators (registry, store, name resolution).
#[derive(Error, Debug)]
pub enum ImageError {
    /// OCI image error (bad reference, bad layout, digest mismatch)
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Local image store error
    #[error("Image store error: {0}")]
    StoreError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ImageError {
    fn from(err: serde_json::Error) -> Self {
        ImageError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ImageError {
    fn from(err: serde_yaml::Error) -> Self {
        ImageError::SerializationError(err.to_string())
    }
}

/// Result type alias for image operations
pub type Result<T> = std::result::Result<T, ImageError>;
