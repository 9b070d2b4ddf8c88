// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Content-digest cache (C4): a content-addressed directory of verified tarballs.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::registry::RegistryClient;

/// Suffix every cache entry carries.
const SUFFIX: &str = ".tar.zst";

/// A content-addressed tarball cache rooted at a directory.
#[derive(Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Open (creating if necessary) a cache rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|source| Error::Io { path: root.clone(), source })?;
        Ok(Self { root })
    }

    /// The default cache root, `.wpm/cache` under the user's home directory. Callers are
    /// never required to use this; it exists only as a convenience default, never consulted
    /// implicitly by the resolver or installer themselves.
    pub fn default_root() -> Result<PathBuf> {
        let home = home::home_dir().ok_or(Error::CacheRootUnresolved)?;
        Ok(home.join(".wpm").join("cache"))
    }

    /// The canonical path for an entry with the given digest, regardless of whether it
    /// currently exists.
    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root.join(format!("{}{SUFFIX}", digest.cache_file_stem()))
    }

    /// Ensure a verified local copy of the tarball at `location` (whose expected content
    /// digest is `digest`) exists in the cache, returning its path.
    ///
    /// 1. If a file at the computed path exists, re-hash it; on match return it, on
    ///    mismatch delete it and fall through to a re-download.
    /// 2. Otherwise stream `download_tarball(location)` through a digest accumulator
    ///    into a temporary sibling file.
    /// 3. If the accumulated digest disagrees with `digest`, fail with `DigestMismatch`.
    /// 4. Atomically rename the temp file into place.
    pub async fn ensure(
        &self,
        registry: &dyn RegistryClient,
        location: &str,
        digest: &Digest,
    ) -> Result<PathBuf> {
        let final_path = self.path_for(digest);

        if fs::try_exists(&final_path)
            .await
            .map_err(|source| Error::Io { path: final_path.clone(), source })?
        {
            if self.rehash(&final_path, digest).await? {
                return Ok(final_path);
            }
            fs::remove_file(&final_path)
                .await
                .map_err(|source| Error::Io { path: final_path.clone(), source })?;
        }

        self.download_and_verify(registry, location, digest, &final_path)
            .await?;

        Ok(final_path)
    }

    async fn rehash(&self, path: &Path, expected: &Digest) -> Result<bool> {
        let bytes = fs::read(path)
            .await
            .map_err(|source| Error::Io { path: path.to_owned(), source })?;
        let actual = expected.algorithm().digest(&bytes);
        Ok(&actual == expected)
    }

    async fn download_and_verify(
        &self,
        registry: &dyn RegistryClient,
        location: &str,
        expected: &Digest,
        final_path: &Path,
    ) -> Result<()> {
        let named_temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", expected.cache_file_stem()))
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(|source| Error::Io { path: self.root.clone(), source })?;
        let temp_path = named_temp.path().to_owned();

        let mut stream = registry
            .download_tarball(location)
            .await
            .map_err(|source| Error::RegistryTransport {
                what: location.to_owned(),
                source: Box::new(source),
            })?;

        let mut file = tokio::fs::File::from_std(named_temp.into_file());

        let mut accumulator = expected.algorithm().accumulator();
        let mut buf = [0u8; 64 * 1024];

        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|source| Error::Io { path: temp_path.clone(), source })?;
            if n == 0 {
                break;
            }
            accumulator.update(&buf[..n]);
            file.write_all(&buf[..n])
                .await
                .map_err(|source| Error::Io { path: temp_path.clone(), source })?;
        }
        file.flush()
            .await
            .map_err(|source| Error::Io { path: temp_path.clone(), source })?;
        drop(file);

        let got = accumulator.finish();
        if &got != expected {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::DigestMismatch {
                expected: expected.clone(),
                got,
            });
        }

        fs::rename(&temp_path, final_path)
            .await
            .map_err(|source| Error::Io { path: final_path.to_owned(), source })?;

        Ok(())
    }
}
