use std::path::PathBuf;

use thiserror::Error;

/// Yolo error types
#[derive(Error, Debug)]
pub enum YoloError {
    /// A build-spec path lies outside the declared store directory
    #[error("Expecting absolute paths from {}, but got: {}", store_dir.display(), path.display())]
    InvalidPath { store_dir: PathBuf, path: PathBuf },

    /// Build spec is missing a required field or holds a malformed value
    #[error("Invalid build spec: {0}")]
    InvalidBuildSpec(String),

    /// Environment entry without a `KEY=` prefix
    #[error("Invalid env entry (expected KEY=VALUE): {0}")]
    InvalidEnvEntry(String),

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Registry pull failed
    #[error("Pulling {reference}: {message}")]
    Pull { reference: String, message: String },

    /// Registry push failed
    #[error("Pushing {reference}: {message}")]
    Push { reference: String, message: String },

    /// Credential verification failed
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Image config or history could not be read
    #[error("Image config unavailable: {0}")]
    ConfigUnavailable(String),

    /// A history entry references a layer the image does not have
    #[error("Layer {index} unavailable in source image")]
    LayerUnavailable { index: usize },

    /// A layer's tar stream could not be decoded
    #[error("Reading layer {layer}: {message}")]
    LayerRead { layer: String, message: String },

    /// A concurrent layer-build task failed
    #[error("Layer task {slot} failed: {message}")]
    LayerTask { slot: usize, message: String },

    /// Layered build failed outside a single layer task
    #[error("Build error: {0}")]
    BuildError(String),

    /// External predictor schema tool failed
    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    /// OCI image layout error
    #[error("OCI image error: {0}")]
    OciImage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl YoloError {
    /// Shorthand for a decode failure on the layer identified by `layer`.
    pub fn layer_read(layer: impl Into<String>, err: impl std::fmt::Display) -> Self {
        YoloError::LayerRead {
            layer: layer.into(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for YoloError {
    fn from(err: serde_json::Error) -> Self {
        YoloError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for YoloError {
    fn from(err: serde_yaml::Error) -> Self {
        YoloError::Serialization(err.to_string())
    }
}

/// Result type alias for Yolo operations
pub type Result<T> = std::result::Result<T, YoloError>;
