//! Dependency resolution and installation engine for a WordPress package manager.
//!
//! This crate owns the install pipeline end to end: reading the manifest and
//! lockfile, resolving the dependency graph against a registry, diffing the
//! resolved graph against disk state into a plan, and executing that plan with
//! atomic, content-addressed installs. It does not own a CLI, HTTP transport, or
//! registry server; those are external collaborators that depend on the traits and
//! types exposed here.

/// Cooperative cancellation handle shared by the resolver and installer.
pub mod cancel;
/// Content-digest cache: a content-addressed directory of verified tarballs.
pub mod cache;
/// Content digests and the algorithms that produce them.
pub mod digest;
/// Crate-wide error type.
pub mod error;
/// Ignore-file matcher used by the publishing path.
pub mod ignore;
/// Installer: fetches, extracts, and atomically swaps packages into place.
pub mod install;
/// Lockfile format and IO.
pub mod lock;
/// Manifest format and IO.
pub mod manifest;
/// Package name/type and on-disk layout.
pub mod package;
/// Plan calculator: diffs the resolved graph against disk state.
pub mod plan;
/// Registry client contract and an in-memory test double.
pub mod registry;
/// Dependency resolver.
pub mod resolver;
