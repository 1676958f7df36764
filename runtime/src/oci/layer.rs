//! Layer blobs and content digests.
//!
//! A [`Layer`] is an immutable, content-addressed blob shared by reference
//! between images. New layers are gzip-compressed with a fixed header so
//! identical tar input always produces an identical digest.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use yolo_core::error::{Result, YoloError};

/// Docker schema 2 layer media type.
pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// OCI gzip layer media type.
pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// An image layer: a compressed (or plain) tar blob plus its digests.
#[derive(Clone)]
pub struct Layer {
    inner: Arc<LayerInner>,
}

struct LayerInner {
    digest: String,
    media_type: String,
    blob: Vec<u8>,
    diff_id: OnceLock<String>,
}

impl Layer {
    /// Wrap an uncompressed tar stream as a new gzip layer.
    pub fn from_tar(tar: &[u8], media_type: impl Into<String>) -> Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(tar)?;
        let blob = encoder.finish()?;

        let layer = Self::from_blob(blob, media_type);
        let _ = layer.inner.diff_id.set(sha256_digest(tar));
        Ok(layer)
    }

    /// Wrap an existing blob, computing its digest.
    pub fn from_blob(blob: Vec<u8>, media_type: impl Into<String>) -> Self {
        let digest = sha256_digest(&blob);
        Self::new(blob, media_type, digest)
    }

    /// Wrap an existing blob whose digest is already known (e.g. from a manifest).
    pub fn new(blob: Vec<u8>, media_type: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                digest: digest.into(),
                media_type: media_type.into(),
                blob,
                diff_id: OnceLock::new(),
            }),
        }
    }

    /// Record a known diff_id so it is not recomputed.
    pub fn with_diff_id(self, diff_id: impl Into<String>) -> Self {
        let _ = self.inner.diff_id.set(diff_id.into());
        self
    }

    /// Blob digest, `sha256:<hex>`.
    pub fn digest(&self) -> &str {
        &self.inner.digest
    }

    pub fn media_type(&self) -> &str {
        &self.inner.media_type
    }

    /// Raw blob bytes as stored in the registry.
    pub fn blob(&self) -> &[u8] {
        &self.inner.blob
    }

    /// Blob size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.blob.len() as u64
    }

    /// Whether the blob is gzip-compressed.
    pub fn is_compressed(&self) -> bool {
        self.inner.blob.starts_with(&GZIP_MAGIC)
    }

    /// Reader over the uncompressed tar stream.
    pub fn uncompressed(&self) -> Box<dyn Read + '_> {
        if self.is_compressed() {
            Box::new(GzDecoder::new(&self.inner.blob[..]))
        } else {
            Box::new(&self.inner.blob[..])
        }
    }

    /// Digest of the uncompressed tar stream, `sha256:<hex>`.
    pub fn diff_id(&self) -> Result<String> {
        if let Some(diff_id) = self.inner.diff_id.get() {
            return Ok(diff_id.clone());
        }

        let mut hasher = Sha256::new();
        let mut reader = self.uncompressed();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| YoloError::layer_read(self.digest(), e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let diff_id = format!("sha256:{}", hex::encode(hasher.finalize()));
        let _ = self.inner.diff_id.set(diff_id.clone());
        Ok(diff_id)
    }

    /// Whether two handles point at the same shared blob.
    pub fn ptr_eq(&self, other: &Layer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("digest", &self.inner.digest)
            .field("media_type", &self.inner.media_type)
            .field("size", &self.inner.blob.len())
            .finish()
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.inner.digest == other.inner.digest
    }
}

impl Eq for Layer {}

/// SHA256 of raw bytes as hex, without prefix.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA256 of raw bytes as a `sha256:<hex>` digest.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(data))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an uncompressed tar from `(name, content)` pairs.
    pub(crate) fn tar_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_from_tar_compresses() {
        let tar = tar_of(&[("a.txt", b"hello")]);
        let layer = Layer::from_tar(&tar, OCI_LAYER).unwrap();
        assert!(layer.is_compressed());
        assert_eq!(layer.media_type(), OCI_LAYER);
        assert_eq!(layer.digest(), sha256_digest(layer.blob()));
    }

    #[test]
    fn test_from_tar_is_deterministic() {
        let tar = tar_of(&[("a.txt", b"hello"), ("b.txt", b"world")]);
        let a = Layer::from_tar(&tar, DOCKER_LAYER).unwrap();
        let b = Layer::from_tar(&tar, DOCKER_LAYER).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.blob(), b.blob());
    }

    #[test]
    fn test_uncompressed_roundtrip() {
        let tar = tar_of(&[("a.txt", b"hello")]);
        let layer = Layer::from_tar(&tar, OCI_LAYER).unwrap();
        let mut out = Vec::new();
        layer.uncompressed().read_to_end(&mut out).unwrap();
        assert_eq!(out, tar);
    }

    #[test]
    fn test_plain_blob_reads_directly() {
        let tar = tar_of(&[("a.txt", b"hello")]);
        let layer = Layer::from_blob(tar.clone(), "application/vnd.oci.image.layer.v1.tar");
        assert!(!layer.is_compressed());
        assert_eq!(layer.diff_id().unwrap(), layer.digest());
    }

    #[test]
    fn test_diff_id_computed_matches_preset() {
        let tar = tar_of(&[("a.txt", b"hello")]);
        let preset = Layer::from_tar(&tar, OCI_LAYER).unwrap();
        let computed = Layer::from_blob(preset.blob().to_vec(), OCI_LAYER);
        assert_eq!(preset.diff_id().unwrap(), computed.diff_id().unwrap());
        assert_eq!(computed.diff_id().unwrap(), sha256_digest(&tar));
    }

    #[test]
    fn test_corrupt_gzip_diff_id_fails() {
        let layer = Layer::from_blob(vec![0x1f, 0x8b, 0x00, 0x01, 0x02], DOCKER_LAYER);
        let err = layer.diff_id().unwrap_err();
        assert!(matches!(err, YoloError::LayerRead { .. }));
    }

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_clone_shares_blob() {
        let layer = Layer::from_blob(b"data".to_vec(), DOCKER_LAYER);
        let copy = layer.clone();
        assert!(layer.ptr_eq(&copy));
    }
}
