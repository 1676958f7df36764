//! Layer extraction to the local filesystem.
//!
//! Only directories, regular files and symlinks are materialized. Entries
//! that would land outside the destination, by name or through a symlink
//! extracted earlier, are rejected.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use tar::{Archive, EntryType};
use yolo_core::error::{Result, YoloError};

use super::image::ImageSource;
use super::layer::Layer;
use super::registry::Registry;

/// What an extraction wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written
    pub files: usize,
    /// Bytes of regular-file content written
    pub bytes: u64,
    pub elapsed: Duration,
}

impl ExtractSummary {
    /// Throughput in bytes per second.
    pub fn throughput(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes as f64 / secs) as u64
        } else {
            self.bytes
        }
    }
}

fn io_error(path: &Path, err: io::Error) -> YoloError {
    YoloError::Io(io::Error::new(
        err.kind(),
        format!("{}: {}", path.display(), err),
    ))
}

/// `dest` joined with an archive entry name, refusing absolute names and `..`.
fn entry_target(dest: &Path, name: &Path) -> Result<PathBuf> {
    let mut target = dest.to_path_buf();
    for component in name.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => {
                return Err(YoloError::OciImage(format!(
                    "Refusing to extract {} outside {}",
                    name.display(),
                    dest.display()
                )))
            }
        }
    }
    Ok(target)
}

/// Refuse `target` if any directory between `dest` and it is a symlink, and
/// drop a symlink sitting at `target` itself so nothing is written through it.
fn guard_links(dest: &Path, target: &Path) -> Result<()> {
    let relative = target.strip_prefix(dest).unwrap_or(target);
    let mut current = dest.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        current.push(component);
        let is_link = fs::symlink_metadata(&current)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            continue;
        }
        if components.peek().is_some() {
            return Err(YoloError::OciImage(format!(
                "Refusing to extract {} through symlink {}",
                target.display(),
                current.display()
            )));
        }
        fs::remove_file(&current).map_err(|e| io_error(&current, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| io_error(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link_name: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link_name, target).map_err(|e| io_error(target, e))
}

#[cfg(not(unix))]
fn create_symlink(_link_name: &Path, target: &Path) -> Result<()> {
    Err(YoloError::OciImage(format!(
        "Symlinks are not supported on this platform: {}",
        target.display()
    )))
}

fn ensure_parent(target: &Path) -> Result<()> {
    match target.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| io_error(parent, e)),
        None => Ok(()),
    }
}

/// Unpack one layer into `dest`, creating it if needed.
pub fn extract_layer(layer: &Layer, dest: &Path) -> Result<ExtractSummary> {
    let started = Instant::now();
    let read_err = |e: io::Error| YoloError::layer_read(layer.digest(), e);

    fs::create_dir_all(dest).map_err(|e| io_error(dest, e))?;

    let mut summary = ExtractSummary::default();
    let mut archive = Archive::new(layer.uncompressed());
    for entry in archive.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let name = entry.path().map_err(read_err)?.into_owned();
        let target = entry_target(dest, &name)?;
        guard_links(dest, &target)?;
        let mode = entry.header().mode().map_err(read_err)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| io_error(&target, e))?;
                set_mode(&target, mode)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                ensure_parent(&target)?;
                let mut file = fs::File::create(&target).map_err(|e| io_error(&target, e))?;
                let written = io::copy(&mut entry, &mut file).map_err(read_err)?;
                set_mode(&target, mode)?;
                summary.files += 1;
                summary.bytes += written;
                tracing::debug!(path = %target.display(), size = written, "Extracted file");
            }
            EntryType::Symlink => {
                let link_name = entry
                    .link_name()
                    .map_err(read_err)?
                    .ok_or_else(|| {
                        YoloError::layer_read(
                            layer.digest(),
                            format!("symlink {} has no target", name.display()),
                        )
                    })?
                    .into_owned();
                ensure_parent(&target)?;
                create_symlink(&link_name, &target)?;
            }
            other => {
                return Err(YoloError::OciImage(format!(
                    "unsupported file type for {}, typeflag {}",
                    name.display(),
                    char::from(other.as_byte())
                )))
            }
        }
    }

    summary.elapsed = started.elapsed();
    Ok(summary)
}

/// Pull `reference` and extract its newest layer into `dest`.
///
/// `dest` must not exist yet.
pub async fn fetch(registry: &dyn Registry, reference: &str, dest: &Path) -> Result<ExtractSummary> {
    if fs::symlink_metadata(dest).is_ok() {
        return Err(YoloError::OciImage(format!(
            "destination {} already exists",
            dest.display()
        )));
    }

    tracing::info!(reference = %reference, "Fetching image metadata");
    let image = registry.pull(reference).await?;
    let layer = image
        .layers()?
        .pop()
        .ok_or_else(|| YoloError::OciImage(format!("{} has no layers", reference)))?;

    let target = dest.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || extract_layer(&layer, &target))
        .await
        .map_err(|e| YoloError::Other(format!("Extraction task failed: {}", e)))??;

    tracing::info!(
        dest = %dest.display(),
        files = summary.files,
        bytes = summary.bytes,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        bytes_per_sec = summary.throughput(),
        "Extracted layer"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::image::{Addendum, HistoryEntry, Image};
    use crate::oci::layer::{tests::tar_of, DOCKER_LAYER};
    use crate::oci::registry::MemoryRegistry;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    fn layer_of(tar: Vec<u8>) -> Layer {
        Layer::from_tar(&tar, DOCKER_LAYER).unwrap()
    }

    fn image_of(layers: Vec<Layer>) -> Image {
        layers.into_iter().fold(Image::empty(), |image, layer| {
            image.append(Addendum {
                layer: Some(layer),
                history: HistoryEntry::new("test"),
            })
        })
    }

    #[test]
    fn test_extract_layer_writes_files() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let layer = layer_of(tar_of(&[("src/main.py", b"print(1)"), ("src/a/b.txt", b"b")]));

        let summary = extract_layer(&layer, &dest).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 9);
        assert_eq!(
            fs::read_to_string(dest.join("src/main.py")).unwrap(),
            "print(1)"
        );
        assert_eq!(fs::read_to_string(dest.join("src/a/b.txt")).unwrap(), "b");
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_layer_dirs_and_symlinks() {
        let mut builder = Builder::new(Vec::new());
        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_mode(0o755);
        dir.set_size(0);
        dir.set_cksum();
        builder.append_data(&mut dir, "src", io::empty()).unwrap();

        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        link.set_cksum();
        builder.append_link(&mut link, "src/current", "main.py").unwrap();
        let tar = builder.into_inner().unwrap();

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        extract_layer(&layer_of(tar), &dest).unwrap();

        assert!(dest.join("src").is_dir());
        assert_eq!(
            fs::read_link(dest.join("src/current")).unwrap(),
            PathBuf::from("main.py")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_layer_refuses_writes_through_symlink() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir(&outside).unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        link.set_cksum();
        builder.append_link(&mut link, "src/evil", &outside).unwrap();
        let mut file = Header::new_gnu();
        file.set_size(5);
        file.set_mode(0o644);
        file.set_cksum();
        builder
            .append_data(&mut file, "src/evil/pwned", &b"pwned"[..])
            .unwrap();
        let tar = builder.into_inner().unwrap();

        let dest = tmp.path().join("out");
        let err = extract_layer(&layer_of(tar), &dest).unwrap_err();
        assert!(err.to_string().contains("through symlink"));
        assert!(!outside.join("pwned").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_layer_replaces_symlink_with_file() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside.txt");
        fs::write(&outside, "keep").unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        link.set_cksum();
        builder.append_link(&mut link, "config", &outside).unwrap();
        let mut file = Header::new_gnu();
        file.set_size(3);
        file.set_mode(0o644);
        file.set_cksum();
        builder.append_data(&mut file, "config", &b"new"[..]).unwrap();
        let tar = builder.into_inner().unwrap();

        let dest = tmp.path().join("out");
        extract_layer(&layer_of(tar), &dest).unwrap();
        assert_eq!(fs::read_to_string(&outside).unwrap(), "keep");
        assert_eq!(fs::read_to_string(dest.join("config")).unwrap(), "new");
        assert!(!fs::symlink_metadata(dest.join("config"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn test_extract_layer_rejects_unsupported_type() {
        let mut builder = Builder::new(Vec::new());
        let mut fifo = Header::new_gnu();
        fifo.set_entry_type(EntryType::Fifo);
        fifo.set_size(0);
        fifo.set_cksum();
        builder.append_data(&mut fifo, "pipe", io::empty()).unwrap();
        let tar = builder.into_inner().unwrap();

        let tmp = TempDir::new().unwrap();
        let err = extract_layer(&layer_of(tar), &tmp.path().join("out")).unwrap_err();
        assert!(err.to_string().contains("unsupported file type for pipe"));
    }

    #[test]
    fn test_entry_target_rejects_escape() {
        let dest = Path::new("/tmp/out");
        assert_eq!(
            entry_target(dest, Path::new("./src/a.py")).unwrap(),
            PathBuf::from("/tmp/out/src/a.py")
        );
        assert!(entry_target(dest, Path::new("../etc/passwd")).is_err());
        assert!(entry_target(dest, Path::new("/etc/passwd")).is_err());
    }

    #[tokio::test]
    async fn test_fetch_extracts_newest_layer() {
        let registry = MemoryRegistry::new();
        registry.insert(
            "r8.im/owner/model",
            image_of(vec![
                layer_of(tar_of(&[("base.txt", b"base")])),
                layer_of(tar_of(&[("src/predict.py", b"predict")])),
            ]),
        );

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model");
        let summary = fetch(&registry, "r8.im/owner/model", &dest).await.unwrap();

        assert_eq!(summary.files, 1);
        assert!(dest.join("src/predict.py").exists());
        assert!(!dest.join("base.txt").exists());
    }

    #[tokio::test]
    async fn test_fetch_refuses_existing_destination() {
        let registry = MemoryRegistry::new();
        let tmp = TempDir::new().unwrap();
        let err = fetch(&registry, "r8.im/owner/model", tmp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_fetch_image_without_layers() {
        let registry = MemoryRegistry::new();
        registry.insert("r8.im/owner/empty", Image::empty());

        let tmp = TempDir::new().unwrap();
        let err = fetch(&registry, "r8.im/owner/empty", &tmp.path().join("out"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has no layers"));
    }
}
