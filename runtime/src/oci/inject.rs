//! Source injection and cloning.
//!
//! Injection replaces the source layers this tool previously added to an
//! image with one fresh layer. The fresh layer holds the new files plus
//! everything from the replaced layers that the new files do not shadow.

use chrono::{DateTime, Utc};
use yolo_core::error::Result;

use super::classify::{classify, SourceMarkers, INJECTED_AUTHOR, INJECTED_BY};
use super::image::{Addendum, HistoryEntry, Image, ImageSource};
use super::layer::Layer;
use super::merge::{merge, LayerFile};
use super::mutate::{mark_cloned, merge_env, set_revision_label, set_schema_labels};
use super::rebuild::{load, strip_injected};
use super::registry::Registry;

/// Everything needed to push new source files on top of an image.
#[derive(Debug, Clone, Default)]
pub struct InjectRequest {
    /// Image to start from
    pub base: String,
    /// Where the result is pushed
    pub dest: String,
    pub files: Vec<LayerFile>,
    /// Predictor OpenAPI schema
    pub schema: Option<String>,
    /// Source commit for the revision label
    pub commit: Option<String>,
    /// `KEY=VALUE` entries merged into the image environment
    pub env: Vec<String>,
}

/// `dest@digest`.
pub fn image_id(dest: &str, digest: &str) -> String {
    format!("{}@{}", dest, digest)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Rewrite `base` with the request's files as its newest source layer.
///
/// Previously injected layers are dropped from the result, but their
/// contents are carried into the new layer wherever no new file has the
/// same name.
pub fn inject<S>(base: &S, request: &InjectRequest, now: DateTime<Utc>) -> Result<Image>
where
    S: ImageSource + ?Sized,
{
    let mut image = strip_injected(base)?;

    if let Some(schema) = non_empty(&request.schema) {
        image = set_schema_labels(&image, schema);
    }
    if !request.env.is_empty() {
        image = merge_env(&image, &request.env)?;
    }
    if let Some(commit) = non_empty(&request.commit) {
        image = set_revision_label(&image, commit);
    }

    let prior = classify(base, SourceMarkers::OWN)?;
    let tar = merge(&request.files, &prior)?;
    let layer = Layer::from_tar(&tar, image.kind().layer_media_type())?;

    tracing::info!(
        files = request.files.len(),
        replaced = prior.len(),
        digest = %layer.digest(),
        "Appending source layer"
    );

    Ok(image.append(Addendum {
        layer: Some(layer),
        history: HistoryEntry {
            created: Some(now),
            created_by: INJECTED_BY.to_string(),
            author: INJECTED_AUTHOR.to_string(),
            ..Default::default()
        },
    }))
}

/// Pull the base image, inject the request's files and push the result.
///
/// Without files only the environment edits apply. Returns the image id of
/// the pushed image.
pub async fn push_files(registry: &dyn Registry, request: &InjectRequest) -> Result<String> {
    tracing::info!(reference = %request.base, "Fetching base image");
    let base = registry.pull(&request.base).await?;

    let image = if request.files.is_empty() {
        let image = load(&base)?;
        if request.env.is_empty() {
            image
        } else {
            merge_env(&image, &request.env)?
        }
    } else {
        inject(&base, request, Utc::now())?
    };

    let started = std::time::Instant::now();
    let digest = registry.push(&image, &request.dest).await?;
    tracing::info!(
        dest = %request.dest,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Pushed image"
    );
    Ok(image_id(&request.dest, &digest))
}

/// Copy `base` to `dest` with a `cloned` label set to the current time, so
/// the pushed manifest always differs from the original.
pub async fn clone_image(registry: &dyn Registry, base: &str, dest: &str) -> Result<String> {
    tracing::info!(reference = %base, "Fetching image to clone");
    let image = load(&registry.pull(base).await?)?;
    let image = mark_cloned(&image, Utc::now());

    let digest = registry.push(&image, dest).await?;
    tracing::info!(source = %base, dest = %dest, digest = %digest, "Cloned image");
    Ok(image_id(dest, &digest))
}
