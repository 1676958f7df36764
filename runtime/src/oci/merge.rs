//! Tar merge engine.
//!
//! Produces one tar stream holding a set of explicit files plus every path
//! from prior layers that those files (or newer prior layers) do not
//! already supply.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};

use tar::{Builder, EntryType, Header};
use yolo_core::error::{Result, YoloError};

use super::layer::Layer;

/// Directory that injected files land under.
pub const SOURCE_DIR: &str = "src";

/// A file to write into a merged layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFile {
    path: String,
    mode: u32,
    content: Vec<u8>,
}

impl LayerFile {
    pub fn new(path: impl Into<String>, mode: u32, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mode,
            content,
        }
    }

    /// Read a file from disk.
    ///
    /// With `relative`, the file keeps its path under `src/` (so `pkg/util.py`
    /// lands at `src/pkg/util.py`); otherwise it lands at `src/<basename>`.
    pub fn from_path(file: &Path, relative: bool) -> Result<Self> {
        let content = fs::read(file).map_err(|e| {
            YoloError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", file.display(), e),
            ))
        })?;
        let metadata = fs::metadata(file)?;

        let path = if relative {
            source_entry_name(file)?
        } else {
            let name = file
                .file_name()
                .ok_or_else(|| YoloError::Other(format!("No file name in {}", file.display())))?;
            format!("{}/{}", SOURCE_DIR, name.to_string_lossy())
        };

        Ok(Self::new(path, file_mode(&metadata), content))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// `src/<file>` with `.` and `..` resolved lexically. A path that climbs
/// out of `src/` is rejected.
fn source_entry_name(file: &Path) -> Result<String> {
    let mut parts = vec![SOURCE_DIR.to_string()];
    for component in file.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
                if parts.is_empty() {
                    return Err(YoloError::Other(format!(
                        "{} escapes the {} directory",
                        file.display(),
                        SOURCE_DIR
                    )));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if parts.len() == 1 {
        return Err(YoloError::Other(format!("No file name in {}", file.display())));
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Canonical form of an archive name used for shadowing: no leading `./`
/// or `/`, no trailing `/`.
pub fn entry_key(name: &str) -> &str {
    let mut key = name;
    loop {
        if let Some(rest) = key.strip_prefix("./") {
            key = rest;
        } else if let Some(rest) = key.strip_prefix('/') {
            key = rest;
        } else {
            break;
        }
    }
    let key = key.trim_end_matches('/');
    if key == "." {
        ""
    } else {
        key
    }
}

/// Merge `files` with the contents of `prior_layers` into one tar stream.
///
/// Explicit files are written first, in order. Prior layers are then read
/// newest first; each entry is copied unless an entry with the same name
/// was already written. Any layer that fails to decode fails the merge.
pub fn merge(files: &[LayerFile], prior_layers: &[Layer]) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    let mut seen: HashSet<String> = HashSet::new();

    for file in files {
        let key = entry_key(file.path()).to_string();
        if key.is_empty() {
            return Err(YoloError::Other(format!(
                "Invalid layer file path: {:?}",
                file.path()
            )));
        }
        if !seen.insert(key.clone()) {
            tracing::debug!(path = %key, "Skipping duplicate layer file");
            continue;
        }

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(file.mode());
        header.set_size(file.size());
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, &key, file.content())?;
    }

    for layer in prior_layers.iter().rev() {
        let copied = copy_unseen(&mut builder, layer, &mut seen)?;
        tracing::debug!(digest = %layer.digest(), copied, "Merged prior layer");
    }

    Ok(builder.into_inner()?)
}

fn copy_unseen(
    builder: &mut Builder<Vec<u8>>,
    layer: &Layer,
    seen: &mut HashSet<String>,
) -> Result<usize> {
    let fail = |e: std::io::Error| YoloError::layer_read(layer.digest(), e);

    let mut archive = tar::Archive::new(layer.uncompressed());
    let mut copied = 0;

    for entry in archive.entries().map_err(fail)? {
        let mut entry = entry.map_err(fail)?;

        let entry_type = entry.header().entry_type();
        if matches!(
            entry_type,
            EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName | EntryType::GNULongLink
        ) {
            continue;
        }

        let name = entry.path().map_err(fail)?.to_string_lossy().into_owned();
        let key = entry_key(&name).to_string();
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }

        let mut header = entry.header().clone();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(fail)?
                .ok_or_else(|| YoloError::layer_read(layer.digest(), format!("{key}: link without target")))?
                .into_owned();
            builder
                .append_link(&mut header, &key, &target)
                .map_err(fail)?;
        } else {
            builder.append_data(&mut header, &key, &mut entry).map_err(fail)?;
        }
        copied += 1;
    }

    Ok(copied)
}
