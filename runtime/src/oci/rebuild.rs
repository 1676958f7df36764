//! Image rebuild: reconstruct an image keeping only selected history entries.

use yolo_core::error::{Result, YoloError};

use super::classify::is_injected;
use super::image::{Addendum, HistoryEntry, Image, ImageSource};

/// Rebuild `source` keeping the history entries for which `keep` is true.
///
/// Starts from an empty image carrying a copy of the source config, then
/// appends each kept entry together with the layer it produced. The layer
/// index advances on every non-empty entry, kept or not, so dropped
/// entries never shift the pairing of later ones.
pub fn rebuild<S, F>(source: &S, mut keep: F) -> Result<Image>
where
    S: ImageSource + ?Sized,
    F: FnMut(&HistoryEntry) -> bool,
{
    let config = source.config_file()?;
    let layers = source.layers()?;
    let history = config.history.clone();

    let mut image = Image::with_config(config, source.manifest_kind());
    let mut index = 0;
    let mut dropped = 0;

    for entry in history {
        let position = index;
        if !entry.empty_layer {
            index += 1;
        }

        if !keep(&entry) {
            dropped += 1;
            continue;
        }

        let layer = if entry.empty_layer {
            None
        } else {
            let layer = layers
                .get(position)
                .cloned()
                .ok_or(YoloError::LayerUnavailable { index: position })?;
            Some(layer)
        };

        image = image.append(Addendum {
            layer,
            history: entry,
        });
    }

    // Layers with no history entry at all are carried over unchanged.
    for layer in layers.into_iter().skip(index) {
        image = image.append(Addendum {
            layer: Some(layer),
            history: HistoryEntry::default(),
        });
    }

    tracing::debug!(
        kept = image.items().len(),
        dropped,
        layers = image.layer_count(),
        "Rebuilt image"
    );
    Ok(image)
}

/// Load any image source into a typed [`Image`] without dropping anything.
pub fn load<S>(source: &S) -> Result<Image>
where
    S: ImageSource + ?Sized,
{
    rebuild(source, |_| true)
}

/// Rebuild `source` without the layers previously injected by this tool.
pub fn strip_injected<S>(source: &S) -> Result<Image>
where
    S: ImageSource + ?Sized,
{
    rebuild(source, |entry| !is_injected(entry))
}
