//! Parallel layered builder.
//!
//! Turns a [`BuildSpec`] into an image: one content layer per store-path
//! group plus the pre-built customisation layer. All layers are built
//! concurrently and appended to the base image in slot order once every
//! task has finished.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use yolo_core::config::{BuildOptions, LayerFailurePolicy, PublishMode};
use yolo_core::error::{Result, YoloError};

use super::archive::archive_paths;
use super::spec::BuildSpec;
use crate::oci::image::{Addendum, HistoryEntry, Image};
use crate::oci::layer::{sha256_hex, Layer};
use crate::oci::mutate::overlay_env;
use crate::oci::rebuild::load;
use crate::oci::registry::Registry;
use crate::oci::store::ImageStore;

/// Tar file expected inside the customisation layer directory.
pub const CUSTOMISATION_TAR: &str = "layer.tar";

/// Optional sha256 of [`CUSTOMISATION_TAR`], next to it.
pub const CUSTOMISATION_CHECKSUM: &str = "checksum";

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Reference the image was published under
    pub reference: String,
    /// Manifest digest
    pub digest: String,
    /// `reference@digest`
    pub image_id: String,
    /// Number of layers in the published image
    pub layer_count: usize,
}

type SlotOutput = Result<Option<Addendum>>;

fn content_layer(
    paths: Vec<PathBuf>,
    mtime: u64,
    created: DateTime<Utc>,
    media_type: &'static str,
) -> SlotOutput {
    let tar = archive_paths(&paths, mtime)?;
    let layer = Layer::from_tar(&tar, media_type)?;

    let listed: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    tracing::debug!(
        digest = %layer.digest(),
        size = layer.size(),
        paths = ?listed,
        "Built content layer"
    );

    Ok(Some(Addendum {
        layer: Some(layer),
        history: HistoryEntry {
            created: Some(created),
            comment: format!("store paths: [{}]", listed.join(" ")),
            ..Default::default()
        },
    }))
}

/// Check `tar` against the directory's checksum file, if there is one.
fn verify_checksum(dir: &Path, tar: &[u8]) -> Result<()> {
    let checksum_path = dir.join(CUSTOMISATION_CHECKSUM);
    let checksum = match std::fs::read_to_string(&checksum_path) {
        Ok(content) => content.trim().to_string(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(YoloError::BuildError(format!(
                "Failed to read {}: {}",
                checksum_path.display(),
                e
            )))
        }
    };

    if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(YoloError::BuildError(format!(
            "Invalid sha256 at {}",
            checksum_path.display()
        )));
    }

    let actual = sha256_hex(tar);
    if !checksum.eq_ignore_ascii_case(&actual) {
        return Err(YoloError::BuildError(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            dir.join(CUSTOMISATION_TAR).display(),
            checksum,
            actual
        )));
    }
    Ok(())
}

fn customisation_layer(
    dir: PathBuf,
    created: DateTime<Utc>,
    media_type: &'static str,
) -> SlotOutput {
    let tar_path = dir.join(CUSTOMISATION_TAR);
    let tar = match std::fs::read(&tar_path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(
                path = %tar_path.display(),
                "Customisation layer not found, skipping"
            );
            return Ok(None);
        }
        Err(e) => {
            return Err(YoloError::BuildError(format!(
                "Failed to read {}: {}",
                tar_path.display(),
                e
            )))
        }
    };

    verify_checksum(&dir, &tar)?;
    let layer = Layer::from_tar(&tar, media_type)?;
    tracing::debug!(
        digest = %layer.digest(),
        size = layer.size(),
        "Built customisation layer"
    );

    Ok(Some(Addendum {
        layer: Some(layer),
        history: HistoryEntry {
            created: Some(created),
            comment: format!("store paths: {}", dir.display()),
            ..Default::default()
        },
    }))
}

/// Build the image described by `spec` without publishing it.
///
/// `now` stands in for a `created` value of `"now"`.
pub async fn assemble(
    spec: &BuildSpec,
    options: &BuildOptions,
    registry: &dyn Registry,
    now: DateTime<Utc>,
) -> Result<Image> {
    spec.validate()?;

    let created = spec.created.resolve(now);
    let mtime = created.timestamp().max(0) as u64;

    let base = match spec.base_reference() {
        Some(reference) => {
            tracing::info!(reference = %reference, "Fetching base image");
            load(&registry.pull(reference).await?)?
        }
        None => Image::empty(),
    };
    let media_type = base.kind().layer_media_type();
    let base_layers = base.layer_count();

    let mut tasks = Vec::with_capacity(spec.store_layers.len() + 1);
    for (slot, group) in spec.store_layers.iter().enumerate() {
        tracing::info!(
            layer = base_layers + slot + 1,
            paths = group.paths().len(),
            "Creating layer from store paths"
        );
        let paths = group.paths().to_vec();
        tasks.push(tokio::task::spawn_blocking(move || {
            content_layer(paths, mtime, created, media_type)
        }));
    }
    if let Some(dir) = spec.customisation_layer.clone() {
        tracing::info!(
            layer = base_layers + tasks.len() + 1,
            "Creating layer with customisation"
        );
        tasks.push(tokio::task::spawn_blocking(move || {
            customisation_layer(dir, created, media_type)
        }));
    }

    // Barrier: every slot finishes before anything is appended.
    let outputs = join_all(tasks).await;

    let base_env = base.config().env.clone();
    let mut image = base;
    for (slot, output) in outputs.into_iter().enumerate() {
        let outcome = match output {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join_error) => Err(join_error.to_string()),
        };
        match outcome {
            Ok(Some(addendum)) => image = image.append(addendum),
            Ok(None) => {}
            Err(message) => match options.on_layer_failure {
                LayerFailurePolicy::Abort => {
                    return Err(YoloError::LayerTask { slot, message });
                }
                LayerFailurePolicy::Skip => {
                    tracing::warn!(slot, error = %message, "Layer task failed, dropping slot");
                }
            },
        }
    }

    let mut final_config = spec.config.clone();
    final_config.env = overlay_env(&base_env, &spec.config.env);
    let architecture = spec.architecture.clone();
    let image = image.edit_config_file(move |config| {
        config.config = final_config;
        config.architecture = architecture;
        config.os = "linux".to_string();
        config.created = Some(created);
    });

    tracing::info!(
        reference = %spec.repo_tag,
        layers = image.layer_count(),
        "Assembled layered image"
    );
    Ok(image)
}

/// Publish `image` as `reference`: push it, or load it into `store`.
pub async fn publish(
    image: &Image,
    reference: &str,
    mode: PublishMode,
    registry: &dyn Registry,
    store: &ImageStore,
) -> Result<BuildResult> {
    let digest = match mode {
        PublishMode::Push => registry.push(image, reference).await?,
        PublishMode::Local => store.put(reference, image).await?.digest,
    };

    Ok(BuildResult {
        reference: reference.to_string(),
        image_id: format!("{}@{}", reference, digest),
        digest,
        layer_count: image.layer_count(),
    })
}

/// Assemble the image described by `spec` and publish it under its repo tag.
pub async fn build(
    spec: &BuildSpec,
    options: &BuildOptions,
    registry: &dyn Registry,
    store: &ImageStore,
) -> Result<BuildResult> {
    let started = std::time::Instant::now();
    let image = assemble(spec, options, registry, Utc::now()).await?;
    let result = publish(&image, &spec.repo_tag, options.publish, registry, store).await?;

    tracing::info!(
        image_id = %result.image_id,
        layers = result.layer_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Build complete"
    );
    Ok(result)
}
