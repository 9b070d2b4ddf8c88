//! Lockfile store (C2): read/write `wpm.lock`, enforcing the schema version ceiling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::manifest::Specifier;
use crate::package::{PackageName, PackageType};

/// Filename of the lockfile.
pub const LOCKFILE_FILE: &str = "wpm.lock";

/// Highest `lockfileVersion` this implementation understands. Anything higher is a
/// hard error: the user must upgrade.
pub const LOCKFILE_VERSION_CEILING: u32 = 1;

const DEFAULT_INDENT: &str = "  ";

/// One locked package entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedPackage {
    /// Exact resolved version.
    pub version: semver::Version,
    /// Opaque locator for the tarball, interpreted by the registry client.
    pub resolved: String,
    /// Content digest of the tarball.
    pub digest: Digest,
    /// Package type, determining on-disk placement.
    pub r#type: PackageType,
    /// Binary shims declared by this package, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<BTreeMap<String, String>>,
    /// This package's own dependency edges, as recorded at lock time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<PackageName, Specifier>>,
}

/// The full lockfile: a schema version plus a flat name-sorted map of locked packages.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    /// Schema version of this document.
    pub lockfile_version: u32,
    /// Locked packages, keyed by name. Serialized in ascending name order because the
    /// underlying map is a `BTreeMap`.
    #[serde(default)]
    pub packages: BTreeMap<PackageName, LockedPackage>,
}

impl Lockfile {
    /// A fresh, empty lockfile at the current schema version.
    pub fn new() -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION_CEILING,
            packages: BTreeMap::new(),
        }
    }
}

impl Default for Lockfile {
    fn default() -> Self {
        Self::new()
    }
}

fn lockfile_path(cwd: &Path) -> PathBuf {
    cwd.join(LOCKFILE_FILE)
}

/// Read the lockfile from `cwd`. Returns `Ok(None)` if no lockfile exists. Rejects any
/// file whose `lockfileVersion` exceeds [`LOCKFILE_VERSION_CEILING`].
pub async fn read(cwd: &Path) -> Result<Option<Lockfile>> {
    let path = lockfile_path(cwd);

    let raw = match fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None);
        }
        Err(source) => return Err(Error::Io { path, source }),
    };

    let lockfile: Lockfile = serde_json::from_str(&raw)
        .map_err(|source| Error::LockfileMalformed { path: path.clone(), source })?;

    if lockfile.lockfile_version > LOCKFILE_VERSION_CEILING {
        return Err(Error::LockfileVersionTooNew {
            path,
            found: lockfile.lockfile_version,
            ceiling: LOCKFILE_VERSION_CEILING,
        });
    }

    Ok(Some(lockfile))
}

/// Write the lockfile to `cwd` using a two-space indent.
pub async fn write(lockfile: &Lockfile, cwd: &Path) -> Result<()> {
    write_with_indent(lockfile, cwd, DEFAULT_INDENT).await
}

/// Write the lockfile to `cwd` using the given indent string (e.g. to mirror the
/// project manifest's detected indentation).
pub async fn write_with_indent(lockfile: &Lockfile, cwd: &Path, indent: &str) -> Result<()> {
    let path = lockfile_path(cwd);

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    lockfile
        .serialize(&mut ser)
        .map_err(|source| Error::LockfileMalformed { path: path.clone(), source })?;
    buf.push(b'\n');

    fs::write(&path, buf)
        .await
        .map_err(|source| Error::Io { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use tempfile::tempdir;

    fn sample_entry() -> LockedPackage {
        LockedPackage {
            version: semver::Version::new(1, 7, 2),
            resolved: "/hello-dolly/1.7.2.tar.zst".into(),
            digest: DigestAlgorithm::Sha256.digest(b"tarball-bytes"),
            r#type: PackageType::Plugin,
            bin: None,
            dependencies: None,
        }
    }

    #[tokio::test]
    async fn missing_lockfile_returns_none() {
        let dir = tempdir().unwrap();
        assert!(read(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn new_lockfile_round_trips() {
        let dir = tempdir().unwrap();
        let mut lockfile = Lockfile::new();
        lockfile
            .packages
            .insert(PackageName::try_from("hello-dolly").unwrap(), sample_entry());

        write(&lockfile, dir.path()).await.unwrap();
        let reread = read(dir.path()).await.unwrap().unwrap();
        assert_eq!(reread, lockfile);
    }

    #[tokio::test]
    async fn rejects_schema_version_above_ceiling() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(LOCKFILE_FILE),
            r#"{"lockfileVersion":2,"packages":{}}"#,
        )
        .await
        .unwrap();

        assert!(matches!(
            read(dir.path()).await,
            Err(Error::LockfileVersionTooNew { found: 2, ceiling: 1, .. })
        ));
    }

    #[tokio::test]
    async fn accepts_schema_version_one() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(LOCKFILE_FILE),
            r#"{"lockfileVersion":1,"packages":{}}"#,
        )
        .await
        .unwrap();

        assert!(read(dir.path()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn absent_packages_key_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCKFILE_FILE), r#"{"lockfileVersion":1}"#)
            .await
            .unwrap();

        let lockfile = read(dir.path()).await.unwrap().unwrap();
        assert!(lockfile.packages.is_empty());
    }

    #[test]
    fn entries_serialize_in_ascending_name_order() {
        let mut lockfile = Lockfile::new();
        lockfile
            .packages
            .insert(PackageName::try_from("zeta").unwrap(), sample_entry());
        lockfile
            .packages
            .insert(PackageName::try_from("alpha").unwrap(), sample_entry());

        let json = serde_json::to_string(&lockfile).unwrap();
        let alpha_pos = json.find("alpha").unwrap();
        let zeta_pos = json.find("zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }
}
