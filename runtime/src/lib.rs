//! Yolo Runtime - layer-level container image composition.
//!
//! Rewrites images at the layer level: swaps injected source layers,
//! merges new files with carried-over content, edits config, and builds
//! multi-layer images in parallel from store paths.

#![allow(clippy::result_large_err)]

pub mod oci;

// Re-export common types
pub use oci::{Addendum, HistoryEntry, HistoryItem, Image, ImageSource, Layer, ManifestKind};
pub use oci::{BuildResult, BuildSpec, InjectRequest, LayerFile};
pub use oci::{ImageStore, MemoryRegistry, Registry, RegistryAuth, RegistryClient, StoredImage};

/// Yolo Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
