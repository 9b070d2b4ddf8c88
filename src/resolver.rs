//! Dependency resolver (C5): breadth-first walk of the manifest graph against a
//! registry, with bounded concurrency, lockfile short-circuiting, conflict
//! arbitration and runtime compatibility checks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::Cancel;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::lock::{LockedPackage, Lockfile};
use crate::manifest::{Manifest, Specifier};
use crate::package::{PackageName, PackageType};
use crate::registry::{canonical_location, RegistryClient, RegistryManifest};

/// Upper bound on concurrent in-flight `fetchMetadata` calls per resolve round.
const MAX_CONCURRENT_FETCHES: usize = 16;

/// One fully-resolved package: the fields of a lockfile entry, plus the registry
/// dependencies discovered while resolving it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedNode {
    /// Concrete resolved version.
    pub version: semver::Version,
    /// Opaque tarball locator.
    pub resolved: String,
    /// Content digest of the tarball.
    pub digest: Digest,
    /// Package type.
    pub r#type: PackageType,
    /// Binary shims this package declares.
    pub bin: Option<std::collections::BTreeMap<String, String>>,
    /// This package's own dependency edges, as seen during resolution.
    pub dependencies: std::collections::BTreeMap<PackageName, Specifier>,
}

impl ResolvedNode {
    /// Convert into the shape stored in the lockfile.
    pub fn into_locked_package(self) -> LockedPackage {
        LockedPackage {
            version: self.version,
            resolved: self.resolved,
            digest: self.digest,
            r#type: self.r#type,
            bin: self.bin,
            dependencies: if self.dependencies.is_empty() {
                None
            } else {
                Some(self.dependencies)
            },
        }
    }
}

/// A pending fetch: the edge `requestor -> name@specifier`.
#[derive(Clone, Debug)]
struct Request {
    name: PackageName,
    specifier: Specifier,
    requestor: PackageName,
}

/// Metadata about one candidate resolution for a `(name, specifier)` pair, before it
/// has been reconciled against any existing resolution.
struct Candidate {
    version: semver::Version,
    resolved: String,
    digest: Digest,
    r#type: PackageType,
    bin: Option<std::collections::BTreeMap<String, String>>,
    dependencies: std::collections::BTreeMap<PackageName, Specifier>,
    requires_wp: Option<String>,
    requires_php: Option<String>,
    /// True when synthesized from the prior lockfile rather than freshly fetched; such
    /// candidates already passed runtime validation at a previous lock time and are not
    /// re-checked.
    from_lockfile: bool,
}

impl Candidate {
    fn from_locked(locked: &LockedPackage) -> Self {
        Self {
            version: locked.version.clone(),
            resolved: locked.resolved.clone(),
            digest: locked.digest.clone(),
            r#type: locked.r#type,
            bin: locked.bin.clone(),
            dependencies: locked.dependencies.clone().unwrap_or_default(),
            requires_wp: None,
            requires_php: None,
            from_lockfile: true,
        }
    }

    fn from_registry(manifest: RegistryManifest) -> Self {
        let resolved = canonical_location(&manifest.name, &manifest.version);
        Self {
            version: manifest.version,
            resolved,
            digest: manifest.dist.digest,
            r#type: manifest.r#type,
            bin: None,
            dependencies: manifest.dependencies,
            requires_wp: manifest.requires_wp,
            requires_php: manifest.requires_php,
            from_lockfile: false,
        }
    }
}

/// Resolve every transitively-reachable dependency of `root_manifest` against
/// `registry`, short-circuiting exact-version lookups against `prior_lockfile`.
///
/// Development dependencies are resolved unconditionally; pruning them is the plan
/// calculator's job.
pub async fn resolve(
    root_manifest: &Manifest,
    prior_lockfile: Option<&Lockfile>,
    registry: Arc<dyn RegistryClient>,
    cancel: &Cancel,
) -> Result<HashMap<PackageName, ResolvedNode>> {
    let mut resolved: HashMap<PackageName, ResolvedNode> = HashMap::new();
    let mut first_requestor: HashMap<PackageName, PackageName> = HashMap::new();

    let mut queue: VecDeque<Request> = root_manifest
        .all_dependencies()
        .map(|(name, specifier)| Request {
            name: name.clone(),
            specifier: specifier.clone(),
            requestor: root_manifest.name.clone(),
        })
        .collect();

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));

    while !queue.is_empty() {
        cancel.check()?;

        let mut batch: HashMap<(PackageName, Specifier), Request> = HashMap::new();
        for request in queue.drain(..) {
            if let Some(existing) = resolved.get(&request.name) {
                if let Some(exact) = request.specifier.as_exact_version() {
                    if exact == existing.version {
                        continue;
                    }
                }
            }
            batch
                .entry((request.name.clone(), request.specifier.clone()))
                .or_insert(request);
        }

        if batch.is_empty() {
            break;
        }

        cancel.check()?;

        let mut tasks = JoinSet::new();
        for request in batch.into_values() {
            let semaphore = Arc::clone(&semaphore);
            let registry = Arc::clone(&registry);
            let locked_entry = prior_lockfile
                .and_then(|lockfile| lockfile.packages.get(&request.name))
                .cloned();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("resolver semaphore is never closed");
                let candidate =
                    fetch_metadata(&request.name, &request.specifier, locked_entry.as_ref(), registry.as_ref())
                        .await;
                (request, candidate)
            });
        }

        let mut next_round = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let (request, candidate) = joined.expect("resolver fetch task panicked");
            let candidate = candidate?;
            let version = candidate.version.clone();

            if let Some(existing) = resolved.get(&request.name) {
                if existing.version == version {
                    continue;
                }
                resolve_conflict(root_manifest, existing, &request, &first_requestor)?;
                continue;
            }

            if !candidate.from_lockfile && root_manifest.runtime_strict() {
                check_runtime_compatible(root_manifest, &request.name, &version, &candidate)?;
            }

            for (dep_name, dep_specifier) in &candidate.dependencies {
                next_round.push(Request {
                    name: dep_name.clone(),
                    specifier: dep_specifier.clone(),
                    requestor: request.name.clone(),
                });
            }

            first_requestor
                .entry(request.name.clone())
                .or_insert_with(|| request.requestor.clone());

            resolved.insert(
                request.name.clone(),
                ResolvedNode {
                    version,
                    resolved: candidate.resolved,
                    digest: candidate.digest,
                    r#type: candidate.r#type,
                    bin: candidate.bin,
                    dependencies: candidate.dependencies,
                },
            );
        }

        queue.extend(next_round);
    }

    Ok(resolved)
}

async fn fetch_metadata(
    name: &PackageName,
    specifier: &Specifier,
    locked: Option<&LockedPackage>,
    registry: &dyn RegistryClient,
) -> Result<Candidate> {
    if let Some(version) = specifier.as_exact_version() {
        if let Some(locked) = locked {
            if locked.version == version {
                tracing::debug!(%name, %version, "resolved from lockfile, no network");
                return Ok(Candidate::from_locked(locked));
            }
        }

        tracing::debug!(%name, %version, "fetching package metadata from registry");
        let manifest = registry
            .get_package_manifest(name, &version.to_string(), false)
            .await
            .map_err(|source| Error::RegistryTransport {
                what: format!("{name}@{version}"),
                source: Box::new(source),
            })?;
        return Ok(Candidate::from_registry(manifest));
    }

    tracing::debug!(%name, specifier = %specifier, "resolving tag/wildcard against registry");
    let manifest = registry
        .get_package_manifest(name, specifier.as_str(), false)
        .await
        .map_err(|source| Error::RegistryTransport {
            what: format!("{name}@{specifier}"),
            source: Box::new(source),
        })?;
    Ok(Candidate::from_registry(manifest))
}

/// Reconcile a new request against an already-resolved entry for the same name.
///
/// Root pins always win. If the root manifest pins `request.name`, a requestor asking
/// for a strictly higher semver version is a hard error (the user must bump the root
/// pin). If the root does not pin the name, any version mismatch between requestors is
/// an unresolvable conflict.
fn resolve_conflict(
    root_manifest: &Manifest,
    existing: &ResolvedNode,
    request: &Request,
    first_requestor: &HashMap<PackageName, PackageName>,
) -> Result<()> {
    let root_pin = root_manifest
        .all_dependencies()
        .find(|(name, _)| *name == &request.name)
        .map(|(_, specifier)| specifier);

    if let Some(root_specifier) = root_pin {
        if let (Some(root_version), Some(requested_version)) =
            (root_specifier.as_exact_version(), request.specifier.as_exact_version())
        {
            if requested_version > root_version {
                return Err(Error::VersionDowngrade {
                    name: request.name.clone(),
                    root_version,
                    requestor: request.requestor.clone(),
                    requested: requested_version,
                });
            }
        }
        return Ok(());
    }

    let first = first_requestor
        .get(&request.name)
        .cloned()
        .unwrap_or_else(|| root_manifest.name.clone());

    Err(Error::DependencyConflict {
        name: request.name.clone(),
        first_requestor: first,
        first_version: existing.version.to_string(),
        second_requestor: request.requestor.clone(),
        second_version: request.specifier.to_string(),
    })
}

fn check_runtime_compatible(
    root_manifest: &Manifest,
    name: &PackageName,
    version: &semver::Version,
    candidate: &Candidate,
) -> Result<()> {
    let config = root_manifest.config.as_ref();
    check_axis(
        "wp",
        candidate.requires_wp.as_deref(),
        config.and_then(|c| c.runtime_wp.as_deref()),
        name,
        version,
    )?;
    check_axis(
        "php",
        candidate.requires_php.as_deref(),
        config.and_then(|c| c.runtime_php.as_deref()),
        name,
        version,
    )?;
    Ok(())
}

fn check_axis(
    axis: &'static str,
    required: Option<&str>,
    actual: Option<&str>,
    name: &PackageName,
    version: &semver::Version,
) -> Result<()> {
    let Some(required) = required.filter(|s| !s.is_empty()) else {
        return Ok(());
    };

    let Some(actual) = actual.filter(|s| !s.is_empty()) else {
        tracing::warn!(%name, %version, axis, "no active runtime version recorded, skipping compatibility check");
        return Ok(());
    };

    let requirement = semver::VersionReq::parse(required).map_err(|source| Error::RuntimeConstraintInvalid {
        axis,
        value: required.to_owned(),
        source,
    })?;
    let actual_version = semver::Version::parse(actual).map_err(|source| Error::RuntimeConstraintInvalid {
        axis,
        value: actual.to_owned(),
        source,
    })?;

    if !requirement.matches(&actual_version) {
        return Err(Error::RuntimeIncompatible {
            name: name.clone(),
            version: version.clone(),
            axis,
            required: required.to_owned(),
            actual: actual.to_owned(),
        });
    }

    Ok(())
}
