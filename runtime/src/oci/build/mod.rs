//! Layered image builds.
//!
//! Builds an image from a declarative spec: groups of store paths become
//! content layers, a pre-built tar becomes the customisation layer, and the
//! spec's runtime config is overlaid on the base image's.
//!
//! # Usage
//!
//! ```text
//! yolo stream-layered-image build.json
//! ```

pub mod archive;
pub mod engine;
pub mod spec;

pub use archive::archive_paths;
pub use engine::{assemble, build, publish, BuildResult};
pub use spec::{BuildSpec, Created, LayerGroup};
