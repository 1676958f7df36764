//! OCI image layout on disk.
//!
//! [`write_layout`] lays an [`Image`] out as `oci-layout`, `index.json` and
//! `blobs/sha256/*`. [`OciLayout`] reads such a directory back as an
//! [`ImageSource`].

use std::path::{Path, PathBuf};

use oci_spec::image::{ImageIndex, ImageManifest};
use yolo_core::error::{Result, YoloError};

use super::image::{ConfigFile, Image, ImageSource, ManifestKind};
use super::layer::{sha256_digest, Layer};

const OCI_LAYOUT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Path of a blob inside a layout, from a `sha256:<hex>` digest.
fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
    match digest.split_once(':') {
        Some((algorithm, hash)) => root_dir.join("blobs").join(algorithm).join(hash),
        None => root_dir.join("blobs").join("sha256").join(digest),
    }
}

fn write_blob(root_dir: &Path, digest: &str, data: &[u8]) -> Result<()> {
    let path = blob_path(root_dir, digest);
    if path.exists() {
        return Ok(());
    }
    std::fs::write(&path, data).map_err(|e| {
        YoloError::OciImage(format!("Failed to write blob {}: {}", path.display(), e))
    })
}

/// Write `image` as an OCI layout under `dir`, tagged `reference`.
///
/// Returns the manifest digest.
pub fn write_layout(image: &Image, reference: &str, dir: &Path) -> Result<String> {
    let blobs_dir = dir.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs_dir).map_err(|e| {
        YoloError::OciImage(format!(
            "Failed to create blobs directory {}: {}",
            blobs_dir.display(),
            e
        ))
    })?;

    for layer in image.layers() {
        write_blob(dir, layer.digest(), layer.blob())?;
    }

    let config = image.config_bytes()?;
    write_blob(dir, &sha256_digest(&config), &config)?;

    let manifest = image.manifest_for_config(&config)?;
    let manifest_digest = sha256_digest(&manifest);
    write_blob(dir, &manifest_digest, &manifest)?;

    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": image.kind().manifest_media_type(),
            "digest": manifest_digest,
            "size": manifest.len(),
            "annotations": {
                "org.opencontainers.image.ref.name": reference
            }
        }]
    });
    std::fs::write(dir.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
    std::fs::write(dir.join("oci-layout"), OCI_LAYOUT)?;

    tracing::debug!(
        path = %dir.display(),
        digest = %manifest_digest,
        layers = image.layer_count(),
        "Wrote OCI layout"
    );
    Ok(manifest_digest)
}

/// An OCI image layout directory read as an image source.
#[derive(Debug)]
pub struct OciLayout {
    root_dir: PathBuf,
    kind: ManifestKind,
    manifest_digest: String,
    manifest: ImageManifest,
}

impl OciLayout {
    /// Open the first image in the layout at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();
        Self::validate(&root_dir)?;

        let index = Self::load_index(&root_dir)?;
        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| YoloError::OciImage("No manifests in index.json".to_string()))?
            .digest()
            .to_string();

        let manifest = Self::load_manifest(&root_dir, &manifest_digest)?;
        let manifest_media_type = manifest.media_type().as_ref().map(|m| m.to_string());
        let config_media_type = manifest.config().media_type().to_string();
        let kind = ManifestKind::detect(manifest_media_type.as_deref(), &config_media_type);

        Ok(Self {
            root_dir,
            kind,
            manifest_digest,
            manifest,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn manifest_digest(&self) -> &str {
        &self.manifest_digest
    }

    fn validate(root_dir: &Path) -> Result<()> {
        for required in ["oci-layout", "index.json", "blobs"] {
            if !root_dir.join(required).exists() {
                return Err(YoloError::OciImage(format!(
                    "Not a valid OCI layout: missing {} in {}",
                    required,
                    root_dir.display()
                )));
            }
        }
        Ok(())
    }

    fn load_index(root_dir: &Path) -> Result<ImageIndex> {
        let index_path = root_dir.join("index.json");
        let content = std::fs::read_to_string(&index_path).map_err(|e| {
            YoloError::OciImage(format!(
                "Failed to read index.json at {}: {}",
                index_path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| YoloError::OciImage(format!("Failed to parse index.json: {}", e)))
    }

    fn load_manifest(root_dir: &Path, digest: &str) -> Result<ImageManifest> {
        let path = blob_path(root_dir, digest);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            YoloError::OciImage(format!(
                "Failed to read manifest at {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| YoloError::OciImage(format!("Failed to parse manifest: {}", e)))
    }
}

impl ImageSource for OciLayout {
    fn config_file(&self) -> Result<ConfigFile> {
        let path = blob_path(&self.root_dir, self.manifest.config().digest());
        let data = std::fs::read(&path).map_err(|e| {
            YoloError::ConfigUnavailable(format!("{}: {}", path.display(), e))
        })?;
        ConfigFile::from_slice(&data).map_err(|e| YoloError::ConfigUnavailable(e.to_string()))
    }

    fn layers(&self) -> Result<Vec<Layer>> {
        let diff_ids = self
            .config_file()
            .map(|config| config.rootfs.diff_ids)
            .unwrap_or_default();
        let aligned = diff_ids.len() == self.manifest.layers().len();

        self.manifest
            .layers()
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                let path = blob_path(&self.root_dir, descriptor.digest());
                let blob = std::fs::read(&path)
                    .map_err(|e| YoloError::layer_read(descriptor.digest().as_str(), e))?;
                let layer = Layer::new(
                    blob,
                    descriptor.media_type().to_string(),
                    descriptor.digest().as_str(),
                );
                Ok(if aligned {
                    layer.with_diff_id(diff_ids[index].clone())
                } else {
                    layer
                })
            })
            .collect()
    }

    fn manifest_kind(&self) -> ManifestKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::image::{Addendum, HistoryEntry};
    use crate::oci::layer::{tests::tar_of, OCI_LAYER};
    use crate::oci::rebuild::load;
    use std::fs;
    use tempfile::TempDir;

    fn sample_image() -> Image {
        let mut config = ConfigFile::default();
        config.architecture = "amd64".to_string();
        config.os = "linux".to_string();
        config.config.env = vec!["PATH=/bin".to_string()];

        Image::with_config(config, ManifestKind::Oci)
            .append(Addendum {
                layer: Some(Layer::from_tar(&tar_of(&[("a", b"a")]), OCI_LAYER).unwrap()),
                history: HistoryEntry::new("FROM scratch"),
            })
            .append(Addendum {
                layer: None,
                history: HistoryEntry::new("ENV PATH=/bin"),
            })
            .append(Addendum {
                layer: Some(Layer::from_tar(&tar_of(&[("b", b"b")]), OCI_LAYER).unwrap()),
                history: HistoryEntry::new("cp . /src # yolo"),
            })
    }

    #[test]
    fn test_blob_path() {
        let root = PathBuf::from("/images/test");
        assert_eq!(
            blob_path(&root, "sha256:abc123"),
            PathBuf::from("/images/test/blobs/sha256/abc123")
        );
        assert_eq!(
            blob_path(&root, "abc123"),
            PathBuf::from("/images/test/blobs/sha256/abc123")
        );
    }

    #[test]
    fn test_write_then_read_layout() {
        let temp_dir = TempDir::new().unwrap();
        let image = sample_image();

        let digest = write_layout(&image, "r8.im/owner/model", temp_dir.path()).unwrap();
        assert_eq!(digest, image.digest().unwrap());
        assert!(temp_dir.path().join("oci-layout").exists());

        let layout = OciLayout::from_path(temp_dir.path()).unwrap();
        assert_eq!(layout.manifest_digest(), digest);
        assert_eq!(layout.manifest_kind(), ManifestKind::Oci);

        let reloaded = load(&layout).unwrap();
        assert_eq!(reloaded.digest().unwrap(), digest);
        assert_eq!(reloaded.config().env, ["PATH=/bin"]);
        assert_eq!(reloaded.items().len(), 3);
    }

    #[test]
    fn test_index_names_reference() {
        let temp_dir = TempDir::new().unwrap();
        write_layout(&sample_image(), "r8.im/owner/model", temp_dir.path()).unwrap();
        let index: serde_json::Value =
            serde_json::from_slice(&fs::read(temp_dir.path().join("index.json")).unwrap()).unwrap();
        assert_eq!(
            index["manifests"][0]["annotations"]["org.opencontainers.image.ref.name"],
            "r8.im/owner/model"
        );
    }

    #[test]
    fn test_validate_missing_parts() {
        let temp_dir = TempDir::new().unwrap();
        let err = OciLayout::from_path(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("oci-layout"));

        fs::write(temp_dir.path().join("oci-layout"), OCI_LAYOUT).unwrap();
        let err = OciLayout::from_path(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("index.json"));

        fs::write(temp_dir.path().join("index.json"), "{}").unwrap();
        let err = OciLayout::from_path(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("blobs"));
    }

    #[test]
    fn test_missing_config_blob_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let image = sample_image();
        write_layout(&image, "r8.im/owner/model", temp_dir.path()).unwrap();

        let config_digest = sha256_digest(&image.config_bytes().unwrap());
        fs::remove_file(blob_path(temp_dir.path(), &config_digest)).unwrap();

        let layout = OciLayout::from_path(temp_dir.path()).unwrap();
        assert!(matches!(
            layout.config_file(),
            Err(YoloError::ConfigUnavailable(_))
        ));
    }
}
