//! Plan calculator (C6): diff the resolved graph against the prior lockfile and disk
//! state into an ordered list of install/update/remove actions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use tokio::fs;

use crate::digest::Digest;
use crate::error::Result;
use crate::lock::Lockfile;
use crate::manifest::Manifest;
use crate::package::{PackageName, PackageType};
use crate::resolver::ResolvedNode;

/// What an [`Action`] asks the installer to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    /// The package is not present on disk and must be fetched and extracted.
    Install,
    /// The package is present but at a different version or digest; swap it in place.
    Update,
    /// The package is no longer reachable from production dependencies (or was dropped
    /// entirely) and must be removed from disk.
    Remove,
}

/// One step of an install plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    /// What to do.
    pub kind: ActionKind,
    /// Package name.
    pub name: PackageName,
    /// Target version. For a `Remove` sourced purely from the prior lockfile, this is
    /// the version being removed.
    pub version: semver::Version,
    /// Opaque tarball locator. Absent for `Remove`.
    pub resolved: Option<String>,
    /// Content digest. Absent for `Remove`.
    pub digest: Option<Digest>,
    /// Package type, determining on-disk placement.
    pub r#type: PackageType,
}

/// Compute the set of names reachable from the root manifest's production
/// `dependencies` by walking the resolved graph's own dependency edges.
fn production_reachable(
    root_manifest: &Manifest,
    resolved: &HashMap<PackageName, ResolvedNode>,
) -> HashSet<PackageName> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<PackageName> = root_manifest
        .dependencies
        .iter()
        .flatten()
        .map(|(name, _)| name.clone())
        .collect();

    while let Some(name) = queue.pop_front() {
        if !visited.insert(name.clone()) {
            continue;
        }
        if let Some(node) = resolved.get(&name) {
            for dep_name in node.dependencies.keys() {
                if !visited.contains(dep_name) {
                    queue.push_back(dep_name.clone());
                }
            }
        }
    }

    visited
}

fn target_path(content_dir: &Path, r#type: PackageType, name: &PackageName) -> std::path::PathBuf {
    content_dir.join(r#type.subdirectory()).join(name.as_str())
}

async fn exists(path: &Path) -> Result<bool> {
    fs::try_exists(path)
        .await
        .map_err(|source| crate::error::Error::Io { path: path.to_owned(), source })
}

/// Diff `prior_lockfile` and `resolved` against the filesystem under `content_dir`,
/// producing the ordered action list the installer executes.
///
/// When `no_dev` is set, only packages reachable from the root manifest's production
/// `dependencies` are retained; everything else reachable only via `devDependencies` is
/// treated as absent and removed if present on disk.
pub async fn compute(
    prior_lockfile: &Lockfile,
    resolved: &HashMap<PackageName, ResolvedNode>,
    content_dir: &Path,
    root_manifest: &Manifest,
    no_dev: bool,
) -> Result<Vec<Action>> {
    let production = if no_dev {
        Some(production_reachable(root_manifest, resolved))
    } else {
        None
    };

    let mut actions = Vec::new();

    for (name, node) in resolved {
        let path = target_path(content_dir, node.r#type, name);
        let on_disk = exists(&path).await?;

        if let Some(production) = &production {
            if !production.contains(name) {
                if on_disk {
                    actions.push(Action {
                        kind: ActionKind::Remove,
                        name: name.clone(),
                        version: node.version.clone(),
                        resolved: None,
                        digest: None,
                        r#type: node.r#type,
                    });
                }
                continue;
            }
        }

        match prior_lockfile.packages.get(name) {
            Some(locked) if locked.version != node.version || locked.digest != node.digest => {
                actions.push(Action {
                    kind: ActionKind::Update,
                    name: name.clone(),
                    version: node.version.clone(),
                    resolved: Some(node.resolved.clone()),
                    digest: Some(node.digest.clone()),
                    r#type: node.r#type,
                });
            }
            Some(_) if !on_disk => {
                actions.push(Action {
                    kind: ActionKind::Install,
                    name: name.clone(),
                    version: node.version.clone(),
                    resolved: Some(node.resolved.clone()),
                    digest: Some(node.digest.clone()),
                    r#type: node.r#type,
                });
            }
            Some(_) => {
                // Locked, matching, and already on disk: no-op.
            }
            None => {
                actions.push(Action {
                    kind: ActionKind::Install,
                    name: name.clone(),
                    version: node.version.clone(),
                    resolved: Some(node.resolved.clone()),
                    digest: Some(node.digest.clone()),
                    r#type: node.r#type,
                });
            }
        }
    }

    for (name, locked) in &prior_lockfile.packages {
        if !resolved.contains_key(name) {
            actions.push(Action {
                kind: ActionKind::Remove,
                name: name.clone(),
                version: locked.version.clone(),
                resolved: None,
                digest: None,
                r#type: locked.r#type,
            });
        }
    }

    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::lock::LockedPackage;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn manifest(deps: &[&str]) -> Manifest {
        let dependencies: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|n| ((*n).to_owned(), serde_json::Value::String("*".into())))
            .collect();
        serde_json::from_value(json!({
            "name": "site",
            "version": "1.0.0",
            "type": "plugin",
            "dependencies": dependencies,
        }))
        .unwrap()
    }

    fn node(version: &str, deps: &[&str]) -> ResolvedNode {
        let mut dependencies = BTreeMap::new();
        for dep in deps {
            dependencies.insert(
                PackageName::try_from(*dep).unwrap(),
                crate::manifest::Specifier::new("*"),
            );
        }
        ResolvedNode {
            version: version.parse().unwrap(),
            resolved: format!("/pkg/{version}.tar.zst"),
            digest: DigestAlgorithm::Sha256.digest(version.as_bytes()),
            r#type: PackageType::Plugin,
            bin: None,
            dependencies,
        }
    }

    fn locked(version: &str, digest_seed: &str) -> LockedPackage {
        LockedPackage {
            version: version.parse().unwrap(),
            resolved: format!("/pkg/{version}.tar.zst"),
            digest: DigestAlgorithm::Sha256.digest(digest_seed.as_bytes()),
            r#type: PackageType::Plugin,
            bin: None,
            dependencies: None,
        }
    }

    #[tokio::test]
    async fn new_package_not_in_lockfile_is_installed() {
        let dir = tempdir().unwrap();
        let manifest = manifest(&["hello-dolly"]);
        let mut resolved = HashMap::new();
        resolved.insert(PackageName::try_from("hello-dolly").unwrap(), node("1.7.2", &[]));
        let lockfile = Lockfile::new();

        let actions = compute(&lockfile, &resolved, dir.path(), &manifest, false)
            .await
            .unwrap();

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Install);
    }

    #[tokio::test]
    async fn unchanged_and_present_package_is_a_no_op() {
        let dir = tempdir().unwrap();
        let manifest = manifest(&["hello-dolly"]);
        let mut resolved = HashMap::new();
        resolved.insert(PackageName::try_from("hello-dolly").unwrap(), node("1.7.2", &[]));

        let mut lockfile = Lockfile::new();
        lockfile
            .packages
            .insert(PackageName::try_from("hello-dolly").unwrap(), locked("1.7.2", "1.7.2"));

        fs::create_dir_all(dir.path().join("plugins").join("hello-dolly"))
            .await
            .unwrap();

        let actions = compute(&lockfile, &resolved, dir.path(), &manifest, false)
            .await
            .unwrap();

        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn locked_but_missing_on_disk_is_reinstalled() {
        let dir = tempdir().unwrap();
        let manifest = manifest(&["hello-dolly"]);
        let mut resolved = HashMap::new();
        resolved.insert(PackageName::try_from("hello-dolly").unwrap(), node("1.7.2", &[]));

        let mut lockfile = Lockfile::new();
        lockfile
            .packages
            .insert(PackageName::try_from("hello-dolly").unwrap(), locked("1.7.2", "1.7.2"));

        let actions = compute(&lockfile, &resolved, dir.path(), &manifest, false)
            .await
            .unwrap();

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Install);
    }

    #[tokio::test]
    async fn version_change_is_an_update() {
        let dir = tempdir().unwrap();
        let manifest = manifest(&["hello-dolly"]);
        let mut resolved = HashMap::new();
        resolved.insert(PackageName::try_from("hello-dolly").unwrap(), node("1.7.3", &[]));

        let mut lockfile = Lockfile::new();
        lockfile
            .packages
            .insert(PackageName::try_from("hello-dolly").unwrap(), locked("1.7.2", "1.7.2"));

        fs::create_dir_all(dir.path().join("plugins").join("hello-dolly"))
            .await
            .unwrap();

        let actions = compute(&lockfile, &resolved, dir.path(), &manifest, false)
            .await
            .unwrap();

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Update);
    }

    #[tokio::test]
    async fn dropped_lockfile_entry_is_removed() {
        let dir = tempdir().unwrap();
        let manifest = manifest(&[]);
        let resolved = HashMap::new();

        let mut lockfile = Lockfile::new();
        lockfile
            .packages
            .insert(PackageName::try_from("hello-dolly").unwrap(), locked("1.7.2", "1.7.2"));

        let actions = compute(&lockfile, &resolved, dir.path(), &manifest, false)
            .await
            .unwrap();

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Remove);
    }

    #[tokio::test]
    async fn no_dev_prunes_dev_only_packages() {
        let dir = tempdir().unwrap();
        // Root only depends on "prod" in production; "dev-only" resolved but unreachable.
        let manifest = manifest(&["prod"]);
        let mut resolved = HashMap::new();
        resolved.insert(PackageName::try_from("prod").unwrap(), node("1.0.0", &[]));
        resolved.insert(PackageName::try_from("dev-only").unwrap(), node("1.0.0", &[]));

        fs::create_dir_all(dir.path().join("plugins").join("dev-only"))
            .await
            .unwrap();

        let lockfile = Lockfile::new();

        let actions = compute(&lockfile, &resolved, dir.path(), &manifest, true)
            .await
            .unwrap();

        assert!(actions
            .iter()
            .any(|a| a.name.as_str() == "dev-only" && a.kind == ActionKind::Remove));
        assert!(actions
            .iter()
            .any(|a| a.name.as_str() == "prod" && a.kind == ActionKind::Install));
    }

    #[tokio::test]
    async fn no_dev_skips_dev_only_package_absent_from_disk() {
        let dir = tempdir().unwrap();
        let manifest = manifest(&["prod"]);
        let mut resolved = HashMap::new();
        resolved.insert(PackageName::try_from("prod").unwrap(), node("1.0.0", &[]));
        resolved.insert(PackageName::try_from("dev-only").unwrap(), node("1.0.0", &[]));

        let lockfile = Lockfile::new();

        let actions = compute(&lockfile, &resolved, dir.path(), &manifest, true)
            .await
            .unwrap();

        assert!(!actions.iter().any(|a| a.name.as_str() == "dev-only"));
    }
}
