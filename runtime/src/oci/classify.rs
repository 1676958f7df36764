//! Source-layer classification.
//!
//! Finds the layers that carry application source code by looking at the
//! `created_by` text of each history entry: the marker this tool writes
//! when it injects files, and the markers left by an external build
//! toolchain copying the source tree.

use std::sync::OnceLock;

use regex::Regex;
use yolo_core::error::{Result, YoloError};

use super::image::{HistoryEntry, ImageSource};
use super::layer::Layer;

/// `created_by` text of layers injected by this tool.
pub const INJECTED_BY: &str = "cp . /src # yolo";

/// Author recorded on injected layers.
pub const INJECTED_AUTHOR: &str = "yolo";

/// Exact `created_by` text of a source copy made by buildkit.
pub const BUILDKIT_SOURCE_COPY: &str = "COPY . /src # buildkit";

fn source_copy_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r" COPY .*/src ?(# .*)?$").expect("source copy pattern is valid")
    })
}

/// Which history markers identify a source layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceMarkers {
    /// Layers injected by this tool
    pub own: bool,
    /// Layers produced by an external build toolchain
    pub foreign: bool,
}

impl SourceMarkers {
    pub const OWN: Self = Self {
        own: true,
        foreign: false,
    };
    pub const FOREIGN: Self = Self {
        own: false,
        foreign: true,
    };
    pub const ALL: Self = Self {
        own: true,
        foreign: true,
    };

    pub fn new(own: bool, foreign: bool) -> Self {
        Self { own, foreign }
    }

    /// Whether `entry` carries one of the selected markers.
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        (self.own && is_injected(entry)) || (self.foreign && is_foreign_source(entry))
    }
}

/// Whether the entry was written by this tool's injection.
pub fn is_injected(entry: &HistoryEntry) -> bool {
    entry.created_by == INJECTED_BY
}

/// Whether the entry is a source copy from an external build toolchain.
pub fn is_foreign_source(entry: &HistoryEntry) -> bool {
    entry.created_by == BUILDKIT_SOURCE_COPY || source_copy_pattern().is_match(&entry.created_by)
}

/// Return the layers whose history entry carries a selected marker, in
/// image order.
///
/// Walks the history with a layer index that only advances on non-empty
/// entries. Matching empty entries contribute nothing.
pub fn classify<S>(image: &S, markers: SourceMarkers) -> Result<Vec<Layer>>
where
    S: ImageSource + ?Sized,
{
    let config = image.config_file()?;
    let layers = image.layers()?;

    let mut found = Vec::new();
    let mut index = 0;
    for entry in &config.history {
        if entry.empty_layer {
            continue;
        }
        if markers.matches(entry) {
            let layer = layers
                .get(index)
                .ok_or(YoloError::LayerUnavailable { index })?;
            tracing::debug!(
                index,
                created_by = %entry.created_by,
                digest = %layer.digest(),
                "Found source layer"
            );
            found.push(layer.clone());
        }
        index += 1;
    }

    Ok(found)
}
