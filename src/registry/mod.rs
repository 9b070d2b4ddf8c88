//! Registry client contract (C3).
//!
//! The core depends on precisely four operations. A concrete HTTP-backed
//! implementation of [`RegistryClient`] is an external collaborator and out of scope
//! for this crate; only the contract and an in-memory test double live here.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::digest::Digest;
use crate::manifest::Specifier;
use crate::package::{PackageName, PackageType};

pub mod memory;

pub use memory::InMemoryRegistry;

/// Distribution metadata for a published package version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dist {
    /// Content digest of the tarball.
    pub digest: Digest,
    /// Compressed size of the tarball, in bytes.
    pub packed_size: u64,
    /// Number of files contained in the tarball.
    pub total_files: u64,
    /// Total size of the extracted contents, in bytes.
    pub unpacked_size: u64,
}

/// The registry's authoritative metadata for one published package version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryManifest {
    /// Package name.
    pub name: PackageName,
    /// Exact package version this manifest describes.
    pub version: semver::Version,
    /// Package type.
    pub r#type: PackageType,
    /// Constraint on the active WordPress version.
    pub requires_wp: Option<String>,
    /// Constraint on the active PHP version.
    pub requires_php: Option<String>,
    /// This version's own dependency edges.
    pub dependencies: BTreeMap<PackageName, Specifier>,
    /// Where and how to fetch the tarball for this version.
    pub dist: Dist,
}

/// Errors a [`RegistryClient`] implementation may surface.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// A transport-level failure (connection refused, TLS failure, timeout, ...).
    #[error("registry transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    /// The registry responded, but the requested package/version/tag does not exist.
    #[error("{name}@{version_or_tag} not found")]
    NotFound {
        /// Package name.
        name: PackageName,
        /// Version or tag requested.
        version_or_tag: String,
    },
    /// The registry responded with a non-2xx status.
    #[error("registry responded with HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// The response payload could not be decoded into the expected shape.
    #[error("failed to decode registry response: {0}")]
    Decode(String),
}

/// A stream of tarball bytes, as returned by [`RegistryClient::download_tarball`].
pub type TarballStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// The canonical wire-format location for a package version: `/<name>/<version>.tar.zst`.
///
/// This is the convention the resolver uses to populate a lockfile entry's `resolved`
/// field; a concrete [`RegistryClient`] is free to interpret it as registry-relative.
pub fn canonical_location(name: &PackageName, version: &semver::Version) -> String {
    format!("/{name}/{version}.tar.zst")
}

/// The four operations the resolver and installer depend on.
///
/// `location` arguments (and the `resolved` field of a lockfile entry / a manifest's
/// `dist`) are opaque strings: whether they are registry-relative paths or absolute
/// URLs is entirely up to the implementation to interpret. The core never parses them.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the registry manifest for `name` at `version_or_tag`. When the argument is
    /// a tag (e.g. `latest`) or the wildcard `*`, the implementation resolves it to a
    /// concrete version and reflects that version in the returned manifest.
    ///
    /// `force_revalidate` asks the implementation to bypass any local HTTP cache layer.
    async fn get_package_manifest(
        &self,
        name: &PackageName,
        version_or_tag: &str,
        force_revalidate: bool,
    ) -> Result<RegistryManifest, RegistryError>;

    /// Stream the (compressed) tarball bytes at `location`. The caller is responsible
    /// for decompression.
    async fn download_tarball(&self, location: &str) -> Result<TarballStream, RegistryError>;

    /// Publish a package. Peripheral to the install core; wired through for
    /// completeness of the contract.
    async fn put_package(
        &self,
        manifest: &RegistryManifest,
        tarball: bytes::Bytes,
    ) -> Result<(), RegistryError>;

    /// Resolve an auth token to a username. Peripheral to the install core.
    async fn whoami(&self, token: &str) -> Result<String, RegistryError>;
}
