//! Build specification for the layered image builder.
//!
//! A build spec names a base image, the groups of store paths that become
//! content layers, an optional pre-built customisation layer, and the final
//! runtime config. It is read from JSON or YAML; keys are snake_case, with
//! camelCase accepted as aliases.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use yolo_core::error::{Result, YoloError};

use crate::oci::image::ContainerConfig;

/// Creation timestamp of the built image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Created {
    /// Wall-clock time when the build starts
    #[default]
    Now,
    At(DateTime<Utc>),
}

impl Created {
    /// The concrete timestamp, with `now` standing in for [`Created::Now`].
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Created::Now => now,
            Created::At(at) => at,
        }
    }
}

impl TryFrom<String> for Created {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value == "now" {
            return Ok(Created::Now);
        }
        DateTime::parse_from_rfc3339(&value)
            .map(|at| Created::At(at.with_timezone(&Utc)))
            .map_err(|e| format!("invalid created timestamp {value:?}: {e}"))
    }
}

impl From<Created> for String {
    fn from(created: Created) -> Self {
        created.to_string()
    }
}

impl fmt::Display for Created {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Created::Now => write!(f, "now"),
            Created::At(at) => write!(f, "{}", at.to_rfc3339()),
        }
    }
}

/// Store paths packed into one content layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerGroup(pub Vec<PathBuf>);

impl LayerGroup {
    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }
}

impl From<Vec<PathBuf>> for LayerGroup {
    fn from(paths: Vec<PathBuf>) -> Self {
        Self(paths)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Base image reference; absent or empty means an empty base
    #[serde(default, alias = "fromImage", skip_serializing_if = "Option::is_none")]
    pub from_image: Option<String>,

    /// One layer per group, in slot order
    #[serde(default, alias = "storeLayers")]
    pub store_layers: Vec<LayerGroup>,

    /// Directory holding a pre-built `layer.tar`
    #[serde(default, alias = "customisationLayer", skip_serializing_if = "Option::is_none")]
    pub customisation_layer: Option<PathBuf>,

    /// Destination reference
    #[serde(default, alias = "repoTag")]
    pub repo_tag: String,

    #[serde(default)]
    pub created: Created,

    /// Runtime config of the result; env is overlaid on the base image's
    #[serde(default)]
    pub config: ContainerConfig,

    #[serde(default)]
    pub architecture: String,

    /// Every layer path must live under this directory
    #[serde(default, alias = "storeDir")]
    pub store_dir: PathBuf,
}

impl BuildSpec {
    /// Load a build spec, choosing YAML or JSON by file extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            YoloError::InvalidBuildSpec(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| YoloError::InvalidBuildSpec(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| YoloError::InvalidBuildSpec(e.to_string()))
    }

    /// Base reference, if one was given.
    pub fn base_reference(&self) -> Option<&str> {
        self.from_image.as_deref().filter(|r| !r.is_empty())
    }

    /// Check required fields and that every store path lies under `store_dir`.
    pub fn validate(&self) -> Result<()> {
        if self.repo_tag.is_empty() {
            return Err(YoloError::InvalidBuildSpec("repo_tag is required".to_string()));
        }
        if self.store_dir.as_os_str().is_empty() {
            return Err(YoloError::InvalidBuildSpec("store_dir is required".to_string()));
        }

        for path in self.store_layers.iter().flat_map(|group| group.paths()) {
            let escapes = path.components().any(|c| c == Component::ParentDir);
            if escapes || !path.starts_with(&self.store_dir) {
                return Err(YoloError::InvalidPath {
                    store_dir: self.store_dir.clone(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}
