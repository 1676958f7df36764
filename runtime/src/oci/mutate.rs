//! Config mutations: labels and environment.
//!
//! Every function returns a new image; the input is left untouched and
//! layers are shared between the two.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use yolo_core::error::{Result, YoloError};

use super::image::Image;

/// Commit the image was built from.
pub const REVISION_LABEL: &str = "org.opencontainers.image.revision";

/// Predictor OpenAPI schema labels.
pub const SCHEMA_LABELS: [&str; 2] = ["org.cogmodel.openapi_schema", "run.cog.openapi_schema"];

/// Timestamp of a clone.
pub const CLONED_LABEL: &str = "cloned";

/// Set one label, replacing any previous value.
pub fn set_label(image: &Image, key: &str, value: &str) -> Image {
    image.edit_config(|config| {
        config.labels.insert(key.to_string(), value.to_string());
    })
}

/// Record the source commit.
pub fn set_revision_label(image: &Image, commit: &str) -> Image {
    set_label(image, REVISION_LABEL, commit)
}

/// Record the predictor schema under both schema labels.
pub fn set_schema_labels(image: &Image, schema: &str) -> Image {
    image.edit_config(|config| {
        for key in SCHEMA_LABELS {
            config.labels.insert(key.to_string(), schema.to_string());
        }
    })
}

/// Record when the image was cloned.
pub fn mark_cloned(image: &Image, at: DateTime<Utc>) -> Image {
    set_label(image, CLONED_LABEL, &at.to_rfc3339())
}

/// Key of a `KEY=VALUE` entry, including the `=`.
fn env_prefix(entry: &str) -> Result<&str> {
    entry
        .find('=')
        .map(|pos| &entry[..=pos])
        .ok_or_else(|| YoloError::InvalidEnvEntry(entry.to_string()))
}

/// Merge `entries` into the image environment.
///
/// An entry replaces the first existing entry with the same key in place;
/// entries with new keys are appended in input order.
pub fn merge_env(image: &Image, entries: &[String]) -> Result<Image> {
    let mut env = image.config().env.clone();
    for entry in entries {
        let prefix = env_prefix(entry)?;
        match env.iter_mut().find(|existing| existing.starts_with(prefix)) {
            Some(existing) => *existing = entry.clone(),
            None => env.push(entry.clone()),
        }
    }
    Ok(image.edit_config(|config| config.env = env))
}

/// Overlay two environment lists: every key from either list, the value
/// from the last occurrence across `base` then `overrides`.
///
/// Entries without `=` are treated as a key with an empty value. The
/// result is sorted by key.
pub fn overlay_env(base: &[String], overrides: &[String]) -> Vec<String> {
    let mut merged: BTreeMap<&str, &str> = BTreeMap::new();
    for entry in base.iter().chain(overrides) {
        let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
        merged.insert(key, value);
    }
    merged
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect()
}
