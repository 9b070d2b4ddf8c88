//! Installer (C7): executes an install plan by fetching, extracting, and atomically
//! swapping directories into place on disk.

pub mod atomic;
pub mod extract;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::ContentCache;
use crate::cancel::Cancel;
use crate::error::{Error, Result};
use crate::plan::{Action, ActionKind};
use crate::registry::RegistryClient;

/// Default worker limit for concurrent in-flight actions (§5).
pub const DEFAULT_NETWORK_CONCURRENCY: usize = 16;

/// Coordinates fetching, extracting, and swapping in the actions of an install plan.
pub struct Installer {
    content_dir: PathBuf,
    cache: ContentCache,
    registry: Arc<dyn RegistryClient>,
    network_concurrency: usize,
    extraction_semaphore: Arc<Semaphore>,
}

impl Installer {
    /// Build an installer rooted at `content_dir`, caching verified tarballs under
    /// `cache_dir`. `network_concurrency` bounds concurrent in-flight actions; the
    /// extraction semaphore is sized to the host's logical CPU count regardless.
    pub async fn new(
        content_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        registry: Arc<dyn RegistryClient>,
        network_concurrency: usize,
    ) -> Result<Self> {
        let cache = ContentCache::open(cache_dir).await?;
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(1);

        Ok(Self {
            content_dir: content_dir.into(),
            cache,
            registry,
            network_concurrency: network_concurrency.max(1),
            extraction_semaphore: Arc::new(Semaphore::new(cpus)),
        })
    }

    /// Execute every action in `actions` with a worker limit of the configured
    /// network concurrency. `progress` is invoked, in completion order, after each
    /// action that finishes successfully.
    ///
    /// Returns the first error encountered. Already-completed actions are not rolled
    /// back: each action is atomic on its own, so a partial batch leaves disk in a
    /// consistent (if incomplete) state.
    pub async fn install_all(
        &self,
        actions: &[Action],
        cancel: &Cancel,
        mut progress: impl FnMut(&Action),
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.network_concurrency));
        let mut tasks = JoinSet::new();

        for action in actions {
            cancel.check()?;

            let semaphore = Arc::clone(&semaphore);
            let content_dir = self.content_dir.clone();
            let cache = self.cache.clone();
            let registry = Arc::clone(&self.registry);
            let extraction_semaphore = Arc::clone(&self.extraction_semaphore);
            let action = action.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("installer semaphore is never closed");
                run_action(content_dir, cache, registry, extraction_semaphore, action).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let action = joined.expect("installer action task panicked")?;
            cancel.check()?;
            progress(&action);
        }

        Ok(())
    }
}

async fn run_action(
    content_dir: PathBuf,
    cache: ContentCache,
    registry: Arc<dyn RegistryClient>,
    extraction_semaphore: Arc<Semaphore>,
    action: Action,
) -> Result<Action> {
    let target = content_dir
        .join(action.r#type.subdirectory())
        .join(action.name.as_str());

    match action.kind {
        ActionKind::Remove => {
            atomic::remove_target(&action.name, target).await?;
        }
        ActionKind::Install | ActionKind::Update => {
            let digest = action
                .digest
                .clone()
                .expect("install/update action always carries a digest");
            let location = action
                .resolved
                .clone()
                .expect("install/update action always carries a location");

            let tarball = cache.ensure(registry.as_ref(), &location, &digest).await?;

            let _permit = extraction_semaphore
                .acquire()
                .await
                .expect("extraction semaphore is never closed");

            let staging_root = tempfile::Builder::new()
                .prefix("wpm-stage-")
                .tempdir()
                .map_err(|source| Error::Io { path: content_dir.clone(), source })?;

            let name = action.name.clone();
            let staging_path = staging_root.path().to_owned();
            let staged_source = tokio::task::spawn_blocking(move || extract::unpack(&name, &tarball, &staging_path))
                .await
                .expect("extraction task panicked")?;

            atomic::swap_into_place(&action.name, staged_source, target).await?;
        }
    }

    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAlgorithm;
    use crate::package::{PackageName, PackageType};
    use crate::registry::{Dist, InMemoryRegistry, RegistryManifest};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn registry_manifest(name: &str, version: &str, tarball: &[u8]) -> RegistryManifest {
        RegistryManifest {
            name: PackageName::try_from(name).unwrap(),
            version: version.parse().unwrap(),
            r#type: PackageType::Plugin,
            requires_wp: None,
            requires_php: None,
            dependencies: BTreeMap::new(),
            dist: Dist {
                digest: DigestAlgorithm::Sha256.digest(tarball),
                packed_size: tarball.len() as u64,
                total_files: 1,
                unpacked_size: tarball.len() as u64,
            },
        }
    }

    fn single_dir_tarball(name: &str, file_contents: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(file_contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{name}/plugin.php"), file_contents)
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();
        zstd::stream::encode_all(tar_bytes.as_slice(), 0).unwrap()
    }

    #[tokio::test]
    async fn install_action_stages_package_under_content_dir() {
        let content_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();

        let tarball = single_dir_tarball("hello-dolly", b"<?php echo 'hi';");
        let registry = InMemoryRegistry::new();
        registry.publish(
            registry_manifest("hello-dolly", "1.7.2", &tarball),
            bytes::Bytes::from(tarball.clone()),
        );

        let installer = Installer::new(
            content_dir.path(),
            cache_dir.path(),
            Arc::new(registry),
            4,
        )
        .await
        .unwrap();

        let action = Action {
            kind: ActionKind::Install,
            name: PackageName::try_from("hello-dolly").unwrap(),
            version: "1.7.2".parse().unwrap(),
            resolved: Some("/hello-dolly/1.7.2.tar.zst".to_owned()),
            digest: Some(DigestAlgorithm::Sha256.digest(&tarball)),
            r#type: PackageType::Plugin,
        };

        let cancel = Cancel::new();
        let completed = Mutex::new(Vec::new());
        installer
            .install_all(&[action], &cancel, |a| completed.lock().unwrap().push(a.name.clone()))
            .await
            .unwrap();

        assert_eq!(completed.lock().unwrap().len(), 1);
        assert!(content_dir
            .path()
            .join("plugins")
            .join("hello-dolly")
            .join("plugin.php")
            .is_file());
    }

    #[tokio::test]
    async fn remove_action_deletes_existing_directory() {
        let content_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let target = content_dir.path().join("plugins").join("hello-dolly");
        tokio::fs::create_dir_all(&target).await.unwrap();

        let registry = InMemoryRegistry::new();
        let installer = Installer::new(content_dir.path(), cache_dir.path(), Arc::new(registry), 4)
            .await
            .unwrap();

        let action = Action {
            kind: ActionKind::Remove,
            name: PackageName::try_from("hello-dolly").unwrap(),
            version: "1.7.2".parse().unwrap(),
            resolved: None,
            digest: None,
            r#type: PackageType::Plugin,
        };

        let cancel = Cancel::new();
        installer.install_all(&[action], &cancel, |_| {}).await.unwrap();

        assert!(!target.exists());
    }

    #[tokio::test]
    async fn remove_action_on_missing_directory_is_not_an_error() {
        let content_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();

        let registry = InMemoryRegistry::new();
        let installer = Installer::new(content_dir.path(), cache_dir.path(), Arc::new(registry), 4)
            .await
            .unwrap();

        let action = Action {
            kind: ActionKind::Remove,
            name: PackageName::try_from("never-installed").unwrap(),
            version: "1.0.0".parse().unwrap(),
            resolved: None,
            digest: None,
            r#type: PackageType::Plugin,
        };

        let cancel = Cancel::new();
        installer.install_all(&[action], &cancel, |_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn digest_mismatch_surfaces_as_error() {
        let content_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();

        let tarball = single_dir_tarball("hello-dolly", b"<?php echo 'hi';");
        let registry = InMemoryRegistry::new();
        registry.publish(
            registry_manifest("hello-dolly", "1.7.2", &tarball),
            bytes::Bytes::from(tarball),
        );

        let installer = Installer::new(content_dir.path(), cache_dir.path(), Arc::new(registry), 4)
            .await
            .unwrap();

        let action = Action {
            kind: ActionKind::Install,
            name: PackageName::try_from("hello-dolly").unwrap(),
            version: "1.7.2".parse().unwrap(),
            resolved: Some("/hello-dolly/1.7.2.tar.zst".to_owned()),
            digest: Some(DigestAlgorithm::Sha256.digest(b"not-the-real-tarball")),
            r#type: PackageType::Plugin,
        };

        let cancel = Cancel::new();
        let err = installer
            .install_all(&[action], &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
    }
}
