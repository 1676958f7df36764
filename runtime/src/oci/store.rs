//! Local image store.
//!
//! Built images are written as OCI layouts under `sha256/<digest>/` with an
//! in-memory index of tagged references backed by a persistent
//! `index.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use yolo_core::error::{Result, YoloError};

use super::image::Image;
use super::layout::{write_layout, OciLayout};

/// Metadata for a stored image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    /// Reference the image was tagged with (e.g., "r8.im/owner/model")
    pub reference: String,
    /// Manifest digest
    pub digest: String,
    /// Total size of the layout in bytes
    pub size_bytes: u64,
    /// When the image was stored
    pub stored_at: DateTime<Utc>,
    /// Path to the OCI layout on disk
    pub path: PathBuf,
}

impl StoredImage {
    /// `reference@digest`, as reported after a local load.
    pub fn image_id(&self) -> String {
        format!("{}@{}", self.reference, self.digest)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Disk-backed store of built images.
pub struct ImageStore {
    store_dir: PathBuf,
    /// reference → StoredImage
    index: Arc<RwLock<HashMap<String, StoredImage>>>,
}

impl ImageStore {
    /// Default location, `~/.yolo/images`.
    pub fn default_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".yolo").join("images"))
            .ok_or_else(|| YoloError::Other("Cannot determine home directory".to_string()))
    }

    /// Open (creating if needed) a store rooted at `store_dir`.
    pub fn new(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            YoloError::OciImage(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index = Self::load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Write `image` into the store and tag it `reference`.
    pub async fn put(&self, reference: &str, image: &Image) -> Result<StoredImage> {
        let digest = image.digest()?;
        let digest_hex = digest.strip_prefix("sha256:").unwrap_or(&digest);
        let target_dir = self.store_dir.join("sha256").join(digest_hex);

        if !target_dir.join("index.json").exists() {
            write_layout(image, reference, &target_dir)?;
        }

        let stored = StoredImage {
            reference: reference.to_string(),
            digest,
            size_bytes: dir_size(&target_dir),
            stored_at: Utc::now(),
            path: target_dir,
        };

        tracing::info!(
            reference = %reference,
            digest = %stored.digest,
            size = stored.size_bytes,
            "Stored image"
        );

        let mut index = self.index.write().await;
        index.insert(reference.to_string(), stored.clone());
        drop(index);

        self.save_index().await?;
        Ok(stored)
    }

    /// Look up a stored image by reference.
    pub async fn get(&self, reference: &str) -> Option<StoredImage> {
        self.index.read().await.get(reference).cloned()
    }

    /// Open a stored image as an image source.
    pub async fn open(&self, reference: &str) -> Result<OciLayout> {
        let stored = self
            .get(reference)
            .await
            .ok_or_else(|| YoloError::OciImage(format!("Image not found: {}", reference)))?;
        OciLayout::from_path(&stored.path)
    }

    /// Untag `reference`, deleting its layout once no other tag uses it.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let mut index = self.index.write().await;
        let image = index
            .remove(reference)
            .ok_or_else(|| YoloError::OciImage(format!("Image not found: {}", reference)))?;
        let digest_still_used = index.values().any(|img| img.digest == image.digest);
        drop(index);

        if !digest_still_used && image.path.exists() {
            std::fs::remove_dir_all(&image.path).map_err(|e| {
                YoloError::OciImage(format!(
                    "Failed to remove image directory {}: {}",
                    image.path.display(),
                    e
                ))
            })?;
        }

        self.save_index().await
    }

    /// All stored images, sorted by reference.
    pub async fn list(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        let mut images: Vec<_> = index.values().cloned().collect();
        images.sort_by(|a, b| a.reference.cmp(&b.reference));
        images
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
        let index_path = store_dir.join("index.json");
        if !index_path.exists() {
            return Ok(HashMap::new());
        }

        let data = std::fs::read_to_string(&index_path).map_err(|e| {
            YoloError::OciImage(format!(
                "Failed to read image store index {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
            YoloError::OciImage(format!("Failed to parse image store index: {}", e))
        })?;

        // Drop entries whose layout has been deleted behind our back
        Ok(store_index
            .images
            .into_iter()
            .filter(|image| image.path.exists())
            .map(|image| (image.reference.clone(), image))
            .collect())
    }

    async fn save_index(&self) -> Result<()> {
        let index = self.index.read().await;
        let store_index = StoreIndex {
            images: index.values().cloned().collect(),
        };
        drop(index);

        let data = serde_json::to_string_pretty(&store_index)?;
        let index_path = self.store_dir.join("index.json");
        tokio::fs::write(&index_path, data).await.map_err(|e| {
            YoloError::OciImage(format!(
                "Failed to write image store index {}: {}",
                index_path.display(),
                e
            ))
        })
    }
}

fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
