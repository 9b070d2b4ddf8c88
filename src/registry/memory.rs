//! An in-memory [`RegistryClient`] double, used by this crate's own test suite and
//! useful to a driver's tests as well. Intentionally not a production registry: it has
//! no transport, no auth, no caching headers — just a `HashMap`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::package::PackageName;

use super::{canonical_location, Dist, RegistryClient, RegistryError, RegistryManifest, TarballStream};

/// One published version: its manifest plus the raw tarball bytes `location` maps to.
#[derive(Clone)]
struct Published {
    manifest: RegistryManifest,
    tarball: Bytes,
}

/// An in-memory registry. `location` strings follow the wire format `/<name>/<version>.tar.zst`.
#[derive(Default)]
pub struct InMemoryRegistry {
    versions: Mutex<HashMap<(PackageName, semver::Version), Published>>,
    tags: Mutex<HashMap<(PackageName, String), semver::Version>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a version directly (bypassing `put_package`), for test setup.
    pub fn publish(&self, manifest: RegistryManifest, tarball: Bytes) {
        let key = (manifest.name.clone(), manifest.version.clone());
        self.versions.lock().unwrap().insert(
            key,
            Published {
                manifest,
                tarball,
            },
        );
    }

    /// Register a tag (e.g. `latest`) pointing at a concrete version, for test setup.
    pub fn tag(&self, name: PackageName, tag: impl Into<String>, version: semver::Version) {
        self.tags
            .lock()
            .unwrap()
            .insert((name, tag.into()), version);
    }

    /// The canonical wire-format location for a package version.
    pub fn location_of(name: &PackageName, version: &semver::Version) -> String {
        canonical_location(name, version)
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn get_package_manifest(
        &self,
        name: &PackageName,
        version_or_tag: &str,
        _force_revalidate: bool,
    ) -> Result<RegistryManifest, RegistryError> {
        let version = if let Ok(version) = semver::Version::parse(version_or_tag) {
            version
        } else {
            self.tags
                .lock()
                .unwrap()
                .get(&(name.clone(), version_or_tag.to_owned()))
                .cloned()
                .ok_or_else(|| RegistryError::NotFound {
                    name: name.clone(),
                    version_or_tag: version_or_tag.to_owned(),
                })?
        };

        self.versions
            .lock()
            .unwrap()
            .get(&(name.clone(), version.clone()))
            .map(|published| published.manifest.clone())
            .ok_or_else(|| RegistryError::NotFound {
                name: name.clone(),
                version_or_tag: version_or_tag.to_owned(),
            })
    }

    async fn download_tarball(&self, location: &str) -> Result<TarballStream, RegistryError> {
        let trimmed = location.trim_start_matches('/');
        let trimmed = trimmed
            .strip_suffix(".tar.zst")
            .ok_or_else(|| RegistryError::Decode(format!("malformed location {location:?}")))?;
        let (name, version) = trimmed
            .split_once('/')
            .ok_or_else(|| RegistryError::Decode(format!("malformed location {location:?}")))?;
        let name = PackageName::try_from(name)
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        let version = semver::Version::parse(version)
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        let tarball = self
            .versions
            .lock()
            .unwrap()
            .get(&(name.clone(), version.clone()))
            .map(|published| published.tarball.clone())
            .ok_or(RegistryError::NotFound {
                name,
                version_or_tag: version.to_string(),
            })?;

        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(std::io::Cursor::new(tarball));
        Ok(Box::into_pin(reader))
    }

    async fn put_package(
        &self,
        manifest: &RegistryManifest,
        tarball: Bytes,
    ) -> Result<(), RegistryError> {
        self.publish(manifest.clone(), tarball);
        Ok(())
    }

    async fn whoami(&self, token: &str) -> Result<String, RegistryError> {
        Ok(format!("token-holder:{token}"))
    }
}
