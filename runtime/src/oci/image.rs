//! Image model: config file, history, and the typed layered image.
//!
//! [`Image`] pairs every history entry with the layer it produced, so the
//! alignment between non-empty history entries and layers holds by
//! construction. Sources whose alignment is not yet known (pulled images,
//! OCI layouts on disk) are read through the [`ImageSource`] trait.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use yolo_core::error::Result;

use super::layer::{sha256_digest, Layer, DOCKER_LAYER, OCI_LAYER};

pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Go-encoded configs use `null` for empty lists and maps.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Runtime portion of an image config (the `config` object).
///
/// Fields not modelled here are kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<BTreeMap<String, Value>>,

    /// `KEY=VALUE` entries
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One history record of an image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub author: String,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub comment: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

impl HistoryEntry {
    pub fn new(created_by: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            kind: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// Full image config file as stored in the config blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub config: ContainerConfig,

    #[serde(default)]
    pub rootfs: RootFs,

    #[serde(default, deserialize_with = "null_as_default")]
    pub history: Vec<HistoryEntry>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConfigFile {
    /// Parse a config blob.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Manifest family of an image; decides the media types of new layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestKind {
    #[default]
    Docker,
    Oci,
}

impl ManifestKind {
    /// Infer the family from a manifest's media type, falling back to the
    /// config media type when the manifest omits its own.
    pub fn detect(manifest_media_type: Option<&str>, config_media_type: &str) -> Self {
        match manifest_media_type {
            Some(OCI_MANIFEST) => ManifestKind::Oci,
            Some(_) => ManifestKind::Docker,
            None if config_media_type == OCI_CONFIG => ManifestKind::Oci,
            None => ManifestKind::Docker,
        }
    }

    pub fn manifest_media_type(self) -> &'static str {
        match self {
            ManifestKind::Docker => DOCKER_MANIFEST,
            ManifestKind::Oci => OCI_MANIFEST,
        }
    }

    pub fn config_media_type(self) -> &'static str {
        match self {
            ManifestKind::Docker => DOCKER_CONFIG,
            ManifestKind::Oci => OCI_CONFIG,
        }
    }

    /// Media type for layers appended to an image of this kind.
    pub fn layer_media_type(self) -> &'static str {
        match self {
            ManifestKind::Docker => DOCKER_LAYER,
            ManifestKind::Oci => OCI_LAYER,
        }
    }
}

/// Read access to an image whose history and layers come from separate lists.
pub trait ImageSource {
    /// Parsed config file, or `ConfigUnavailable`.
    fn config_file(&self) -> Result<ConfigFile>;

    /// Layers bottom to top.
    fn layers(&self) -> Result<Vec<Layer>>;

    fn manifest_kind(&self) -> ManifestKind;
}

/// A history entry and, unless it is empty, the layer it produced.
#[derive(Debug, Clone)]
pub enum HistoryItem {
    Empty(HistoryEntry),
    Layered(HistoryEntry, Layer),
}

impl HistoryItem {
    pub fn entry(&self) -> &HistoryEntry {
        match self {
            HistoryItem::Empty(entry) | HistoryItem::Layered(entry, _) => entry,
        }
    }

    pub fn layer(&self) -> Option<&Layer> {
        match self {
            HistoryItem::Empty(_) => None,
            HistoryItem::Layered(_, layer) => Some(layer),
        }
    }
}

/// A layer (optional) plus the history entry describing it.
#[derive(Debug, Clone)]
pub struct Addendum {
    pub layer: Option<Layer>,
    pub history: HistoryEntry,
}

impl From<Addendum> for HistoryItem {
    fn from(addendum: Addendum) -> Self {
        let mut history = addendum.history;
        history.empty_layer = addendum.layer.is_none();
        match addendum.layer {
            Some(layer) => HistoryItem::Layered(history, layer),
            None => HistoryItem::Empty(history),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor<'a> {
    media_type: &'a str,
    digest: String,
    size: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    schema_version: u32,
    media_type: &'a str,
    config: Descriptor<'a>,
    layers: Vec<Descriptor<'a>>,
}

/// An in-memory image. Cloning shares layer blobs.
#[derive(Debug, Clone, Default)]
pub struct Image {
    /// Config without history or rootfs; both are derived from `items`
    config: ConfigFile,
    kind: ManifestKind,
    items: Vec<HistoryItem>,
}

impl Image {
    /// An image with no layers, no history, and a default config.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty image with the given config and manifest kind.
    pub fn with_config(mut config: ConfigFile, kind: ManifestKind) -> Self {
        config.history.clear();
        config.rootfs.diff_ids.clear();
        Self {
            config,
            kind,
            items: Vec::new(),
        }
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    /// The runtime config object.
    pub fn config(&self) -> &ContainerConfig {
        &self.config.config
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.items.iter().map(HistoryItem::entry)
    }

    /// Layers bottom to top.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.items.iter().filter_map(HistoryItem::layer)
    }

    pub fn layer_count(&self) -> usize {
        self.layers().count()
    }

    /// Append a layer and its history entry.
    pub fn append(mut self, addendum: Addendum) -> Self {
        self.items.push(addendum.into());
        self
    }

    /// Copy with the config file edited; layers are shared.
    pub fn edit_config_file(&self, edit: impl FnOnce(&mut ConfigFile)) -> Self {
        let mut image = self.clone();
        edit(&mut image.config);
        image.config.history.clear();
        image.config.rootfs.diff_ids.clear();
        image
    }

    /// Copy with the runtime config edited; layers are shared.
    pub fn edit_config(&self, edit: impl FnOnce(&mut ContainerConfig)) -> Self {
        self.edit_config_file(|file| edit(&mut file.config))
    }

    /// The complete config file with history and diff_ids filled in.
    pub fn to_config_file(&self) -> Result<ConfigFile> {
        let mut config = self.config.clone();
        config.history = self.history().cloned().collect();
        config.rootfs = RootFs {
            kind: "layers".to_string(),
            diff_ids: self
                .layers()
                .map(Layer::diff_id)
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(config)
    }

    /// Serialized config blob.
    pub fn config_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_config_file()?)?)
    }

    /// Serialized manifest for this image and its config blob.
    pub fn manifest_bytes(&self) -> Result<Vec<u8>> {
        let config = self.config_bytes()?;
        self.manifest_for_config(&config)
    }

    pub(crate) fn manifest_for_config(&self, config: &[u8]) -> Result<Vec<u8>> {
        let manifest = Manifest {
            schema_version: 2,
            media_type: self.kind.manifest_media_type(),
            config: Descriptor {
                media_type: self.kind.config_media_type(),
                digest: sha256_digest(config),
                size: config.len() as u64,
            },
            layers: self
                .layers()
                .map(|layer| Descriptor {
                    media_type: layer.media_type(),
                    digest: layer.digest().to_string(),
                    size: layer.size(),
                })
                .collect(),
        };
        Ok(serde_json::to_vec(&manifest)?)
    }

    /// Manifest digest, `sha256:<hex>`.
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_digest(&self.manifest_bytes()?))
    }
}

impl ImageSource for Image {
    fn config_file(&self) -> Result<ConfigFile> {
        self.to_config_file()
    }

    fn layers(&self) -> Result<Vec<Layer>> {
        Ok(Image::layers(self).cloned().collect())
    }

    fn manifest_kind(&self) -> ManifestKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(data: &[u8]) -> Layer {
        Layer::from_blob(data.to_vec(), DOCKER_LAYER).with_diff_id(sha256_digest(data))
    }

    #[test]
    fn test_parse_docker_config_with_nulls() {
        let json = r#"{
            "architecture": "amd64",
            "os": "linux",
            "config": {"Env": null, "Labels": null, "Hostname": "", "Cmd": ["sh"]},
            "rootfs": {"type": "layers", "diff_ids": ["sha256:aa"]},
            "history": [{"created_by": "FROM busybox"}]
        }"#;
        let config = ConfigFile::from_slice(json.as_bytes()).unwrap();
        assert!(config.config.env.is_empty());
        assert!(config.config.labels.is_empty());
        assert_eq!(config.config.cmd, Some(vec!["sh".to_string()]));
        assert_eq!(config.config.extra.get("Hostname"), Some(&Value::from("")));
        assert_eq!(config.history.len(), 1);
        assert!(!config.history[0].empty_layer);
    }

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let json = r#"{"architecture":"amd64","os":"linux","docker_version":"24.0","config":{"OnBuild":null}}"#;
        let config = ConfigFile::from_slice(json.as_bytes()).unwrap();
        let out = serde_json::to_value(&config).unwrap();
        assert_eq!(out["docker_version"], "24.0");
        assert!(out["config"].get("OnBuild").is_some());
    }

    #[test]
    fn test_history_entry_omits_false_empty_layer() {
        let entry = HistoryEntry::new("cp . /src # yolo");
        let out = serde_json::to_string(&entry).unwrap();
        assert_eq!(out, r#"{"created_by":"cp . /src # yolo"}"#);
    }

    #[test]
    fn test_manifest_kind_detect() {
        assert_eq!(
            ManifestKind::detect(Some(OCI_MANIFEST), OCI_CONFIG),
            ManifestKind::Oci
        );
        assert_eq!(
            ManifestKind::detect(Some(DOCKER_MANIFEST), DOCKER_CONFIG),
            ManifestKind::Docker
        );
        assert_eq!(ManifestKind::detect(None, OCI_CONFIG), ManifestKind::Oci);
        assert_eq!(ManifestKind::detect(None, "other"), ManifestKind::Docker);
        assert_eq!(ManifestKind::Oci.layer_media_type(), OCI_LAYER);
        assert_eq!(ManifestKind::Docker.layer_media_type(), DOCKER_LAYER);
    }

    #[test]
    fn test_append_keeps_alignment() {
        let image = Image::empty()
            .append(Addendum {
                layer: Some(layer(b"one")),
                history: HistoryEntry::new("a"),
            })
            .append(Addendum {
                layer: None,
                history: HistoryEntry::new("ENV X=1"),
            })
            .append(Addendum {
                layer: Some(layer(b"two")),
                history: HistoryEntry::new("b"),
            });

        assert_eq!(image.layer_count(), 2);
        let config = image.to_config_file().unwrap();
        assert_eq!(config.history.len(), 3);
        assert!(config.history[1].empty_layer);
        assert!(!config.history[2].empty_layer);
        assert_eq!(config.rootfs.diff_ids.len(), 2);
        assert_eq!(config.rootfs.diff_ids[0], sha256_digest(b"one"));
    }

    #[test]
    fn test_append_corrects_empty_layer_flag() {
        let mut history = HistoryEntry::new("x");
        history.empty_layer = true;
        let image = Image::empty().append(Addendum {
            layer: Some(layer(b"x")),
            history,
        });
        assert!(!image.history().next().unwrap().empty_layer);
    }

    #[test]
    fn test_edit_config_leaves_source_untouched() {
        let base = Image::empty();
        let edited = base.edit_config(|c| {
            c.labels.insert("k".to_string(), "v".to_string());
        });
        assert!(base.config().labels.is_empty());
        assert_eq!(edited.config().labels.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn test_digest_is_stable() {
        let image = Image::empty().append(Addendum {
            layer: Some(layer(b"one")),
            history: HistoryEntry::new("a"),
        });
        assert_eq!(image.digest().unwrap(), image.clone().digest().unwrap());
    }

    #[test]
    fn test_manifest_lists_layers_in_order() {
        let image = Image::with_config(ConfigFile::default(), ManifestKind::Oci)
            .append(Addendum {
                layer: Some(layer(b"one")),
                history: HistoryEntry::new("a"),
            })
            .append(Addendum {
                layer: Some(layer(b"two")),
                history: HistoryEntry::new("b"),
            });
        let manifest: Value = serde_json::from_slice(&image.manifest_bytes().unwrap()).unwrap();
        assert_eq!(manifest["mediaType"], OCI_MANIFEST);
        assert_eq!(manifest["config"]["mediaType"], OCI_CONFIG);
        assert_eq!(manifest["layers"][0]["digest"], sha256_digest(b"one"));
        assert_eq!(manifest["layers"][1]["digest"], sha256_digest(b"two"));
    }
}
