//! Registry transport for pulling and pushing images.
//!
//! [`RegistryClient`] talks to a real registry through `oci-distribution`;
//! [`MemoryRegistry`] keeps images in memory for dry runs and tests. Both
//! implement [`Registry`], which is all the rest of the crate depends on.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::{ImageIndexEntry, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use yolo_core::error::{Result, YoloError};

use super::image::{ConfigFile, Image, ImageSource, ManifestKind};
use super::layer::{sha256_digest, Layer};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Pull and push transport.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the image named by `reference`.
    async fn pull(&self, reference: &str) -> Result<PulledImage>;

    /// Upload `image` under `reference`, returning the manifest digest.
    async fn push(&self, image: &Image, reference: &str) -> Result<String>;
}

/// An image as fetched from a registry: raw config plus layer blobs.
///
/// The config is only parsed when asked for, so a malformed config
/// surfaces as `ConfigUnavailable` from [`ImageSource::config_file`].
#[derive(Debug, Clone)]
pub struct PulledImage {
    kind: ManifestKind,
    config: Vec<u8>,
    layers: Vec<Layer>,
}

impl PulledImage {
    pub fn new(kind: ManifestKind, config: Vec<u8>, layers: Vec<Layer>) -> Self {
        Self {
            kind,
            config,
            layers,
        }
    }

    /// Snapshot a typed image as it would come back from a registry.
    pub fn from_image(image: &Image) -> Result<Self> {
        Ok(Self::new(
            image.kind(),
            image.config_bytes()?,
            image.layers().cloned().collect(),
        ))
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

impl ImageSource for PulledImage {
    fn config_file(&self) -> Result<ConfigFile> {
        ConfigFile::from_slice(&self.config).map_err(|e| YoloError::ConfigUnavailable(e.to_string()))
    }

    fn layers(&self) -> Result<Vec<Layer>> {
        let diff_ids = self
            .config_file()
            .map(|config| config.rootfs.diff_ids)
            .unwrap_or_default();
        if diff_ids.len() != self.layers.len() {
            return Ok(self.layers.clone());
        }
        Ok(self
            .layers
            .iter()
            .zip(diff_ids)
            .map(|(layer, diff_id)| layer.clone().with_diff_id(diff_id))
            .collect())
    }

    fn manifest_kind(&self) -> ManifestKind {
        self.kind
    }
}

/// Parse a reference string for `oci-distribution`.
pub fn parse_reference(reference: &str) -> Result<Reference> {
    reference
        .parse::<Reference>()
        .map_err(|e| YoloError::InvalidReference(format!("{}: {}", reference, e)))
}

/// Registry client over `oci-distribution`.
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    /// Create a client with anonymous authentication.
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }

    pub fn with_auth(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_amd64_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn pull(&self, reference: &str) -> Result<PulledImage> {
        let oci_ref = parse_reference(reference)?;
        let pull_err = |message: String| YoloError::Pull {
            reference: reference.to_string(),
            message,
        };

        tracing::info!(reference = %reference, "Pulling image from registry");

        let auth = self.auth.to_oci_auth();
        let (manifest, digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| pull_err(format!("Failed to pull manifest: {}", e)))?;

        let mut config = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config)
            .await
            .map_err(|e| pull_err(format!("Failed to pull config blob: {}", e)))?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            tracing::debug!(
                digest = %descriptor.digest,
                size = descriptor.size,
                "Pulling layer"
            );
            let mut blob = Vec::new();
            self.client
                .pull_blob(&oci_ref, descriptor, &mut blob)
                .await
                .map_err(|e| pull_err(format!("Failed to pull layer {}: {}", descriptor.digest, e)))?;
            layers.push(Layer::new(
                blob,
                descriptor.media_type.clone(),
                descriptor.digest.clone(),
            ));
        }

        let kind = ManifestKind::detect(manifest.media_type.as_deref(), &manifest.config.media_type);
        tracing::info!(
            reference = %reference,
            digest = %digest,
            layers = layers.len(),
            "Image pulled"
        );
        Ok(PulledImage::new(kind, config, layers))
    }

    async fn push(&self, image: &Image, reference: &str) -> Result<String> {
        let oci_ref = parse_reference(reference)?;

        let config_data = image.config_bytes()?;
        let manifest_data = image.manifest_for_config(&config_data)?;
        let manifest: OciImageManifest = serde_json::from_slice(&manifest_data)?;
        let digest = sha256_digest(&serde_json::to_vec(&manifest)?);

        let config = Config::new(config_data, image.kind().config_media_type().to_string(), None);
        let layers: Vec<ImageLayer> = image
            .layers()
            .map(|layer| ImageLayer::new(layer.blob().to_vec(), layer.media_type().to_string(), None))
            .collect();

        tracing::info!(
            reference = %reference,
            layers = layers.len(),
            "Pushing image to registry"
        );

        let auth = self.auth.to_oci_auth();
        let response = self
            .client
            .push(&oci_ref, &layers, config, &auth, Some(manifest))
            .await
            .map_err(|e| YoloError::Push {
                reference: reference.to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(
            reference = %reference,
            digest = %digest,
            manifest_url = %response.manifest_url,
            "Image pushed"
        );
        Ok(digest)
    }
}

/// Select the linux/amd64 entry of a multi-platform index.
fn linux_amd64_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == "amd64")
        })
        .map(|entry| entry.digest.clone())
}

/// In-memory registry keyed by reference.
#[derive(Default)]
pub struct MemoryRegistry {
    images: Mutex<HashMap<String, Image>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an image under `reference`.
    pub fn insert(&self, reference: &str, image: Image) {
        if let Ok(mut images) = self.images.lock() {
            images.insert(reference.to_string(), image);
        }
    }

    /// The image last pushed or inserted under `reference`.
    pub fn get(&self, reference: &str) -> Option<Image> {
        self.images.lock().ok()?.get(reference).cloned()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn pull(&self, reference: &str) -> Result<PulledImage> {
        let image = self.get(reference).ok_or_else(|| YoloError::Pull {
            reference: reference.to_string(),
            message: "manifest unknown".to_string(),
        })?;
        PulledImage::from_image(&image)
    }

    async fn push(&self, image: &Image, reference: &str) -> Result<String> {
        let digest = image.digest()?;
        self.insert(reference, image.clone());
        Ok(digest)
    }
}
