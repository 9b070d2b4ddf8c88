//! Crate-wide error type.
//!
//! Every fallible operation in `wpm-core` returns `Result<T, Error>`. Lower-level
//! causes are attached via `#[source]`/`#[from]` so a driver can match on the
//! error *kind* rather than parse a message.

use std::path::PathBuf;

use crate::digest::Digest;
use crate::package::PackageName;

/// Errors raised anywhere in the install pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No manifest file was found at the expected location.
    #[error("no manifest found in {path}")]
    ManifestMissing {
        /// Directory that was searched.
        path: PathBuf,
    },

    /// The manifest exists but could not be parsed as the expected shape.
    #[error("malformed manifest at {path}")]
    ManifestMalformed {
        /// Path to the offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The lockfile exists but could not be parsed.
    #[error("malformed lockfile at {path}")]
    LockfileMalformed {
        /// Path to the offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The lockfile declares a schema version newer than this implementation understands.
    #[error("lockfile at {path} declares schema version {found}, but this implementation only understands up to {ceiling}")]
    LockfileVersionTooNew {
        /// Path to the offending file.
        path: PathBuf,
        /// Version found in the file.
        found: u32,
        /// Highest version this implementation accepts.
        ceiling: u32,
    },

    /// The registry client reported a transport-level failure.
    #[error("registry transport error while fetching {what}")]
    RegistryTransport {
        /// Short description of what was being fetched.
        what: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The registry responded that the requested package or version does not exist.
    #[error("package {name}@{version_or_tag} not found in registry")]
    RegistryNotFound {
        /// Package name.
        name: PackageName,
        /// Version or tag that was requested.
        version_or_tag: String,
    },

    /// A downloaded tarball's content digest did not match the expected value.
    #[error("digest mismatch: expected {expected}, got {got}")]
    DigestMismatch {
        /// Digest recorded in the manifest/lockfile.
        expected: Digest,
        /// Digest actually observed.
        got: Digest,
    },

    /// A transitive requirement asks for a version higher than the one pinned at the root.
    #[error(
        "version downgrade: root manifest pins {name}@{root_version}, but {requestor} requires {requested}; bump the root pin"
    )]
    VersionDowngrade {
        /// Conflicting package name.
        name: PackageName,
        /// Version pinned in the root manifest.
        root_version: semver::Version,
        /// Package that requested the higher version.
        requestor: PackageName,
        /// Version requested by `requestor`.
        requested: semver::Version,
    },

    /// Two requestors need mutually incompatible versions and the root manifest does not pin a
    /// version to resolve the conflict.
    #[error(
        "dependency conflict on {name}: {first_requestor} requires {first_version}, {second_requestor} requires {second_version}; add an explicit root dependency to disambiguate"
    )]
    DependencyConflict {
        /// Conflicting package name.
        name: PackageName,
        /// First requestor seen.
        first_requestor: PackageName,
        /// Version the first requestor needs.
        first_version: String,
        /// Second requestor seen.
        second_requestor: PackageName,
        /// Version the second requestor needs.
        second_version: String,
    },

    /// A package's declared runtime requirement is incompatible with the active runtime.
    #[error("{name}@{version} requires {axis} {required}, but the active runtime is {actual}")]
    RuntimeIncompatible {
        /// Package name.
        name: PackageName,
        /// Package version.
        version: semver::Version,
        /// Which runtime axis failed (`wp` or `php`).
        axis: &'static str,
        /// The requirement string that failed to match.
        required: String,
        /// The runtime version that was tested.
        actual: String,
    },

    /// A runtime requirement or runtime version string failed to parse.
    #[error("failed to parse {axis} constraint {value:?}")]
    RuntimeConstraintInvalid {
        /// Which runtime axis (`wp` or `php`).
        axis: &'static str,
        /// The offending string.
        value: String,
        /// Underlying parse error.
        #[source]
        source: semver::Error,
    },

    /// An extracted tarball did not have the expected single-top-level-directory shape, or
    /// contained a path escaping the extraction root.
    #[error("invalid package structure for {name}: {reason}")]
    InvalidPackageStructure {
        /// Package name.
        name: PackageName,
        /// Human-readable reason.
        reason: String,
    },

    /// The atomic directory swap for an install/update action failed.
    #[error("atomic swap failed for {name} at {target}: {reason}")]
    AtomicSwapFailed {
        /// Package name.
        name: PackageName,
        /// Target directory that was being swapped into.
        target: PathBuf,
        /// Human-readable reason.
        reason: String,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The operation was cancelled via a `Cancel` handle.
    #[error("operation cancelled")]
    Cancelled,

    /// The default cache root could not be resolved because the platform's home/config
    /// directory is unavailable.
    #[error("could not resolve a default cache directory; pass one explicitly")]
    CacheRootUnresolved,

    /// A filesystem operation failed outside of any more specific category above.
    #[error("I/O error at {path}")]
    Io {
        /// Path the operation was acting on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A package name failed validation.
    #[error(transparent)]
    InvalidPackageName(#[from] crate::package::PackageNameError),

    /// A package type string did not match `theme | plugin | mu-plugin`.
    #[error(transparent)]
    InvalidPackageType(#[from] crate::package::PackageTypeError),

    /// A digest string failed to parse.
    #[error(transparent)]
    InvalidDigest(#[from] crate::digest::DigestError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
