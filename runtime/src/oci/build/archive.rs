//! Normalized tar archives of store paths.
//!
//! Every entry carries uid/gid 0, owner `root:root` and the same mtime, so
//! a layer depends only on file contents, modes and link targets.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;
use yolo_core::error::{Result, YoloError};

/// Directories written at the top of every content layer.
pub const STORE_ROOT_DIRS: [&str; 2] = ["nix", "nix/store"];

const STORE_ROOT_MODE: u32 = 0o555;

fn io_error(path: &Path, err: io::Error) -> YoloError {
    YoloError::Io(io::Error::new(
        err.kind(),
        format!("{}: {}", path.display(), err),
    ))
}

fn normalize(header: &mut Header, mtime: u64) -> Result<()> {
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    Ok(())
}

/// Archive name for a filesystem path: the path without its leading `/`.
fn archive_name(path: &Path) -> PathBuf {
    path.strip_prefix("/").unwrap_or(path).to_path_buf()
}

/// All regular files and symlinks under `root`, without following links.
/// A `root` that is itself a symlink yields just the link.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).follow_root_links(false);
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            match e.into_io_error() {
                Some(err) => io_error(&path, err),
                None => YoloError::BuildError(format!("Walking {}", path.display())),
            }
        })?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Tar every file reachable from `paths` in sorted path order.
///
/// Directories are walked recursively; symlinks are stored as links;
/// hardlinked files are stored as independent regular files. Entries of
/// any other type are skipped.
pub fn archive_paths(paths: &[PathBuf], mtime: u64) -> Result<Vec<u8>> {
    let mut files = Vec::new();
    for path in paths {
        files.extend(collect_files(path)?);
    }
    files.sort();
    files.dedup();

    let mut builder = Builder::new(Vec::new());

    for dir in STORE_ROOT_DIRS {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(STORE_ROOT_MODE);
        header.set_size(0);
        normalize(&mut header, mtime)?;
        builder.append_data(&mut header, dir, io::empty())?;
    }

    for file in &files {
        append_file(&mut builder, file, mtime)?;
    }

    tracing::debug!(files = files.len(), "Archived store paths");
    Ok(builder.into_inner()?)
}

fn append_file(builder: &mut Builder<Vec<u8>>, file: &Path, mtime: u64) -> Result<()> {
    let metadata = fs::symlink_metadata(file).map_err(|e| io_error(file, e))?;
    let name = archive_name(file);

    let mut header = Header::new_gnu();
    header.set_metadata(&metadata);
    normalize(&mut header, mtime)?;

    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        let target = fs::read_link(file).map_err(|e| io_error(file, e))?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder
            .append_link(&mut header, &name, &target)
            .map_err(|e| io_error(file, e))?;
    } else if file_type.is_file() {
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.len());
        let data = fs::File::open(file).map_err(|e| io_error(file, e))?;
        builder
            .append_data(&mut header, &name, data)
            .map_err(|e| io_error(file, e))?;
    } else {
        tracing::warn!(path = %file.display(), "Skipping unsupported file type");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries(tar: &[u8]) -> Vec<(String, tar::Header)> {
        let mut archive = tar::Archive::new(tar);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                (name, entry.header().clone())
            })
            .collect()
    }

    fn stripped(path: &Path) -> String {
        archive_name(path).to_string_lossy().into_owned()
    }

    #[test]
    fn test_archive_paths_layout() {
        let temp_dir = TempDir::new().unwrap();
        let pkg = temp_dir.path().join("pkg");
        fs::create_dir_all(pkg.join("lib")).unwrap();
        fs::write(pkg.join("lib/z.so"), b"z").unwrap();
        fs::write(pkg.join("a.txt"), b"a").unwrap();

        let tar = archive_paths(&[pkg.clone()], 1).unwrap();
        let names: Vec<_> = entries(&tar).into_iter().map(|(n, _)| n).collect();

        assert_eq!(
            names,
            vec![
                "nix".to_string(),
                "nix/store".to_string(),
                stripped(&pkg.join("a.txt")),
                stripped(&pkg.join("lib/z.so")),
            ]
        );
    }

    #[test]
    fn test_archive_headers_normalized() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f");
        fs::write(&file, b"data").unwrap();

        let tar = archive_paths(&[file], 1_700_000_000).unwrap();
        for (name, header) in entries(&tar) {
            assert_eq!(header.uid().unwrap(), 0, "{name}");
            assert_eq!(header.gid().unwrap(), 0, "{name}");
            assert_eq!(header.username().unwrap(), Some("root"), "{name}");
            assert_eq!(header.groupname().unwrap(), Some("root"), "{name}");
            assert_eq!(header.mtime().unwrap(), 1_700_000_000, "{name}");
        }
    }

    #[test]
    fn test_archive_root_dirs_mode() {
        let tar = archive_paths(&[], 1).unwrap();
        let all = entries(&tar);
        assert_eq!(all.len(), 2);
        for (_, header) in all {
            assert!(header.entry_type().is_dir());
            assert_eq!(header.mode().unwrap(), 0o555);
        }
    }

    #[test]
    fn test_archive_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let pkg = temp_dir.path().join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("b"), b"b").unwrap();
        fs::write(pkg.join("a"), b"a").unwrap();

        assert_eq!(
            archive_paths(&[pkg.clone()], 5).unwrap(),
            archive_paths(&[pkg], 5).unwrap()
        );
    }

    #[test]
    fn test_archive_missing_path_fails() {
        let err = archive_paths(&[PathBuf::from("/nonexistent/store/path")], 1).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/store/path"));
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_symlink_not_followed() {
        let temp_dir = TempDir::new().unwrap();
        let pkg = temp_dir.path().join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("real"), b"real").unwrap();
        std::os::unix::fs::symlink("real", pkg.join("link")).unwrap();

        let tar = archive_paths(&[pkg.clone()], 1).unwrap();
        let link = entries(&tar)
            .into_iter()
            .find(|(name, _)| name.ends_with("/link"))
            .unwrap();
        assert!(link.1.entry_type().is_symlink());
        assert_eq!(
            link.1.link_name().unwrap().unwrap().to_string_lossy(),
            "real"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_symlinked_store_path_is_single_link() {
        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("f"), b"f").unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert_eq!(collect_files(&link).unwrap(), vec![link.clone()]);

        let tar = archive_paths(&[link.clone()], 1).unwrap();
        let under_link: Vec<_> = entries(&tar)
            .into_iter()
            .filter(|(name, _)| name.starts_with(&stripped(&link)))
            .collect();
        assert_eq!(under_link.len(), 1);
        assert!(under_link[0].1.entry_type().is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_flattens_hardlinks() {
        let temp_dir = TempDir::new().unwrap();
        let pkg = temp_dir.path().join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("a"), b"shared").unwrap();
        fs::hard_link(pkg.join("a"), pkg.join("b")).unwrap();

        let tar = archive_paths(&[pkg], 1).unwrap();
        let files: Vec<_> = entries(&tar)
            .into_iter()
            .filter(|(_, h)| h.entry_type().is_file())
            .collect();
        assert_eq!(files.len(), 2);
        for (_, header) in files {
            assert_eq!(header.size().unwrap(), 6);
        }
    }
}
