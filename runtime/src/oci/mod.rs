//! Layer-level image composition.
//!
//! Images are handled as a base plus an ordered list of history items,
//! each optionally carrying the layer it produced. Nothing here unpacks a
//! full root filesystem; layers are read only to merge or extract them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  pull   ┌────────────┐ classify ┌──────────┐
//! │ Registry │────────▶│   Image    │─────────▶│ rebuild  │
//! └──────────┘         │ (history + │          │ (strip)  │
//!      ▲               │  layers)   │          └────┬─────┘
//!      │ push          └────────────┘               │
//!      │                                            ▼
//! ┌────┴─────┐  append  ┌────────────┐  merge  ┌──────────┐
//! │  mutate  │◀─────────│ new layer  │◀────────│ files +  │
//! │ (config) │          └────────────┘         │ prior    │
//! └──────────┘                                 └──────────┘
//! ```

pub mod auth;
pub mod build;
pub mod classify;
pub mod cog;
pub mod extract;
pub mod image;
pub mod inject;
pub mod layer;
pub mod layout;
pub mod merge;
pub mod mutate;
pub mod rebuild;
pub mod registry;
pub mod schema;
pub mod store;

pub use auth::{authenticate, HttpTokenVerifier, TokenVerifier};
pub use build::{BuildResult, BuildSpec};
pub use classify::{classify, SourceMarkers};
pub use cog::{cog_config, dependencies, CogConfig};
pub use extract::{extract_layer, fetch, ExtractSummary};
pub use image::{
    Addendum, ConfigFile, ContainerConfig, HistoryEntry, HistoryItem, Image, ImageSource,
    ManifestKind,
};
pub use inject::{clone_image, push_files, InjectRequest};
pub use layer::Layer;
pub use layout::OciLayout;
pub use merge::{merge, LayerFile};
pub use rebuild::{rebuild, strip_injected};
pub use registry::{MemoryRegistry, PulledImage, Registry, RegistryAuth, RegistryClient};
pub use schema::{CommandSchemaParser, SchemaParser};
pub use store::{ImageStore, StoredImage};
