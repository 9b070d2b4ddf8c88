//! Tarball extraction (C7): decompress a cached Zstandard tarball into a fresh
//! staging directory, enforcing path containment and the single-top-level-directory
//! archive shape.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::package::PackageName;

/// Decompress and unpack the Zstandard-compressed tar archive at `tarball` into
/// `staging`, a directory that must already exist and be empty. Returns the path to
/// the archive's single top-level directory.
///
/// Synchronous and CPU-bound; callers run this inside `tokio::task::spawn_blocking`.
pub fn unpack(name: &PackageName, tarball: &Path, staging: &Path) -> Result<PathBuf> {
    let file = File::open(tarball).map_err(|source| Error::Io { path: tarball.to_owned(), source })?;
    let decoder = zstd::stream::read::Decoder::new(file)
        .map_err(|source| Error::Io { path: tarball.to_owned(), source })?;
    let mut archive = tar::Archive::new(decoder);

    let mut directory_mtimes: Vec<(PathBuf, u64)> = Vec::new();

    let entries = archive
        .entries()
        .map_err(|source| Error::Io { path: tarball.to_owned(), source })?;

    for entry in entries {
        let mut entry = entry.map_err(|source| Error::Io { path: tarball.to_owned(), source })?;
        let entry_type = entry.header().entry_type();

        // PAX extended headers carry no content of their own.
        if entry_type.is_pax_global_extensions() || entry_type.is_pax_local_extensions() {
            continue;
        }

        let raw_path = entry
            .path()
            .map_err(|source| Error::Io { path: tarball.to_owned(), source })?
            .into_owned();

        let relative = contained_relative(staging, &raw_path).ok_or_else(|| Error::InvalidPackageStructure {
            name: name.clone(),
            reason: format!("archive entry {raw_path:?} escapes the extraction root"),
        })?;

        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = staging.join(&relative);

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let link_name = entry
                .link_name()
                .map_err(|source| Error::Io { path: target.clone(), source })?
                .ok_or_else(|| Error::InvalidPackageStructure {
                    name: name.clone(),
                    reason: format!("archive entry {raw_path:?} is a link with no target"),
                })?;

            if link_name.is_absolute() || !link_stays_inside(staging, &target, &link_name) {
                return Err(Error::InvalidPackageStructure {
                    name: name.clone(),
                    reason: format!("link {raw_path:?} -> {link_name:?} escapes the extraction root"),
                });
            }
        }

        reject_type_mismatch(name, &target, entry_type)?;

        if entry_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|source| Error::Io { path: target.clone(), source })?;
            if let Ok(mtime) = entry.header().mtime() {
                directory_mtimes.push((target.clone(), mtime));
            }
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io { path: parent.to_owned(), source })?;
        }

        entry
            .unpack(&target)
            .map_err(|source| Error::Io { path: target.clone(), source })?;

        mask_permissions(&target);
    }

    // Restore directory mtimes only after every child has been written, deepest first
    // so a parent's mtime isn't bumped again by its own children.
    for (dir, mtime) in directory_mtimes.into_iter().rev() {
        let _ = filetime::set_file_mtime(&dir, filetime::FileTime::from_unix_time(mtime as i64, 0));
    }

    single_top_level_directory(name, staging)
}

/// Resolve `raw` (an archive entry's path) against `staging`, rejecting any path that
/// would normalize to somewhere outside of it. Returns the path relative to `staging`.
fn contained_relative(staging: &Path, raw: &Path) -> Option<PathBuf> {
    let normalized = lexical_normalize(&staging.join(raw));
    if normalized.starts_with(staging) {
        normalized.strip_prefix(staging).ok().map(Path::to_path_buf)
    } else {
        None
    }
}

/// Whether a link at `target` pointing at the (possibly relative) `link_name` stays
/// within `staging` once normalized.
fn link_stays_inside(staging: &Path, target: &Path, link_name: &Path) -> bool {
    let candidate = target.parent().unwrap_or(staging).join(link_name);
    lexical_normalize(&candidate).starts_with(staging)
}

/// Lexically normalize a path (no filesystem access), collapsing `.` and resolving
/// `..` against preceding normal components.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

fn reject_type_mismatch(name: &PackageName, target: &Path, entry_type: tar::EntryType) -> Result<()> {
    if let Ok(existing) = std::fs::symlink_metadata(target) {
        if existing.is_dir() != entry_type.is_dir() {
            return Err(Error::InvalidPackageStructure {
                name: name.clone(),
                reason: format!("{} changes type during extraction", target.display()),
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn mask_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode() & 0o777;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
    }
}

#[cfg(not(unix))]
fn mask_permissions(_path: &Path) {}

fn single_top_level_directory(name: &PackageName, staging: &Path) -> Result<PathBuf> {
    let mut entries = std::fs::read_dir(staging)
        .map_err(|source| Error::Io { path: staging.to_owned(), source })?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| Error::Io { path: staging.to_owned(), source })?;

    if entries.len() != 1 {
        return Err(Error::InvalidPackageStructure {
            name: name.clone(),
            reason: format!("expected exactly one top-level directory, found {}", entries.len()),
        });
    }

    let only = entries.remove(0);
    let file_type = only
        .file_type()
        .map_err(|source| Error::Io { path: only.path(), source })?;

    if !file_type.is_dir() {
        return Err(Error::InvalidPackageStructure {
            name: name.clone(),
            reason: "archive's single top-level entry is not a directory".to_owned(),
        });
    }

    Ok(only.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn package_name() -> PackageName {
        PackageName::try_from("hello-dolly").unwrap()
    }

    fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zstd_compress(tar_bytes: &[u8]) -> Vec<u8> {
        zstd::stream::encode_all(tar_bytes, 0).unwrap()
    }

    #[test]
    fn unpacks_single_top_level_directory() {
        let dir = tempdir().unwrap();
        let staging = tempdir().unwrap();

        let tar_bytes = build_archive(&[
            ("hello-dolly/plugin.php", b"<?php"),
            ("hello-dolly/readme.txt", b"hi"),
        ]);
        let tarball_path = dir.path().join("pkg.tar.zst");
        std::fs::File::create(&tarball_path)
            .unwrap()
            .write_all(&zstd_compress(&tar_bytes))
            .unwrap();

        let top = unpack(&package_name(), &tarball_path, staging.path()).unwrap();
        assert_eq!(top, staging.path().join("hello-dolly"));
        assert!(top.join("plugin.php").is_file());
        assert!(top.join("readme.txt").is_file());
    }

    #[test]
    fn rejects_multiple_top_level_entries() {
        let dir = tempdir().unwrap();
        let staging = tempdir().unwrap();

        let tar_bytes = build_archive(&[("a/file.txt", b"a"), ("b/file.txt", b"b")]);
        let tarball_path = dir.path().join("pkg.tar.zst");
        std::fs::File::create(&tarball_path)
            .unwrap()
            .write_all(&zstd_compress(&tar_bytes))
            .unwrap();

        let err = unpack(&package_name(), &tarball_path, staging.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidPackageStructure { .. }));
    }

    #[test]
    fn rejects_path_traversal_entry() {
        let dir = tempdir().unwrap();
        let staging = tempdir().unwrap();

        let tar_bytes = build_archive(&[("../../etc/passwd", b"pwned")]);
        let tarball_path = dir.path().join("pkg.tar.zst");
        std::fs::File::create(&tarball_path)
            .unwrap()
            .write_all(&zstd_compress(&tar_bytes))
            .unwrap();

        let err = unpack(&package_name(), &tarball_path, staging.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidPackageStructure { .. }));
    }

    #[test]
    fn lexical_normalize_collapses_parent_dirs() {
        let normalized = lexical_normalize(Path::new("/root/a/b/../../c"));
        assert_eq!(normalized, PathBuf::from("/root/c"));
    }
}
