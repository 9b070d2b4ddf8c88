//! Project manifest store (C1): read/write `wpm.json`, preserving observed indentation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};
use crate::package::{PackageName, PackageType};

/// Filename of the project manifest.
pub const MANIFEST_FILE: &str = "wpm.json";

const DEFAULT_CONTENT_DIR: &str = "wp-content";
const DEFAULT_BIN_DIR: &str = "wp-bin";
const DEFAULT_INDENT: &str = "  ";
const MAX_TAGS: usize = 5;

fn default_content_dir() -> String {
    DEFAULT_CONTENT_DIR.to_owned()
}

fn default_bin_dir() -> String {
    DEFAULT_BIN_DIR.to_owned()
}

fn default_true() -> bool {
    true
}

/// A dependency specifier: a concrete version, the wildcard `*`, or a registry tag
/// (e.g. `latest`). Never a range — ranges only appear in runtime requirements.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Specifier(String);

impl Specifier {
    /// Build a specifier from a raw string as found in the manifest.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw specifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this specifier is the wildcard `*`.
    pub fn is_wildcard(&self) -> bool {
        self.0 == "*"
    }

    /// Parse this specifier as an exact semver version, if it is one (as opposed to a
    /// wildcard or a tag like `latest`).
    pub fn as_exact_version(&self) -> Option<semver::Version> {
        if self.is_wildcard() {
            return None;
        }
        semver::Version::parse(&self.0).ok()
    }
}

impl std::fmt::Display for Specifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional WordPress/PHP runtime constraints.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requires {
    /// Constraint on the active WordPress version, as a semver requirement string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wp: Option<String>,
    /// Constraint on the active PHP version, as a semver requirement string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub php: Option<String>,
}

/// Project-level configuration block (`config` key of the manifest).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding plugins/themes/mu-plugins, relative to the project root.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
    /// Directory holding installed binary shims, relative to the project root.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,
    /// Whether the resolver enforces `requires.wp`/`requires.php` constraints.
    #[serde(default = "default_true")]
    pub runtime_strict: bool,
    /// The active WordPress version the resolver checks constraints against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_wp: Option<String>,
    /// The active PHP version the resolver checks constraints against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_php: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            bin_dir: default_bin_dir(),
            runtime_strict: true,
            runtime_wp: None,
            runtime_php: None,
        }
    }
}

/// The typed shape of `wpm.json`. Unknown top-level keys are preserved in `extra` and
/// re-emitted verbatim on write.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Project package name.
    pub name: PackageName,
    /// Project package version.
    pub version: semver::Version,
    /// Project package type.
    pub r#type: PackageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<Requires>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<PackageName, Specifier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_dependencies: Option<BTreeMap<PackageName, Specifier>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts: Option<BTreeMap<String, String>>,
    /// Unknown top-level keys, preserved verbatim across read/write.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    /// Indentation string detected on read, used to re-serialize with the same style.
    /// Never part of the JSON document itself.
    #[serde(skip)]
    indent: String,
}

impl Manifest {
    /// Iterate over both `dependencies` and `devDependencies` as `(name, specifier)` pairs.
    pub fn all_dependencies(&self) -> impl Iterator<Item = (&PackageName, &Specifier)> {
        self.dependencies
            .iter()
            .flatten()
            .chain(self.dev_dependencies.iter().flatten())
    }

    /// The effective content directory, applying the default when `config` is absent.
    pub fn content_dir(&self) -> &str {
        self.config
            .as_ref()
            .map(|c| c.content_dir.as_str())
            .unwrap_or(DEFAULT_CONTENT_DIR)
    }

    /// Whether runtime compatibility checks are enabled (default: true).
    pub fn runtime_strict(&self) -> bool {
        self.config.as_ref().map(|c| c.runtime_strict).unwrap_or(true)
    }

    /// Validate the small constraints the manifest format imposes beyond JSON shape
    /// (currently: at most [`MAX_TAGS`] tags).
    pub fn validate(&self) -> Result<()> {
        if let Some(tags) = &self.tags {
            if tags.len() > MAX_TAGS {
                return Err(Error::ManifestMalformed {
                    path: PathBuf::from(MANIFEST_FILE),
                    source: serde_json::Error::custom(format!(
                        "at most {MAX_TAGS} tags are allowed, found {}",
                        tags.len()
                    )),
                });
            }
        }
        Ok(())
    }
}

fn manifest_path(cwd: &Path) -> PathBuf {
    cwd.join(MANIFEST_FILE)
}

/// Detect the indentation style of a JSON document: the leading whitespace run of the
/// first indented non-empty line, falling back to two spaces.
fn detect_indent(raw: &str) -> String {
    for line in raw.lines() {
        let trimmed_start = line.trim_start_matches([' ', '\t']);
        if trimmed_start.is_empty() {
            continue;
        }
        let indent_len = line.len() - trimmed_start.len();
        if indent_len > 0 {
            return line[..indent_len].to_owned();
        }
    }
    DEFAULT_INDENT.to_owned()
}

/// Read the manifest from `cwd`. Returns `Ok(None)` if no manifest file exists.
pub async fn read(cwd: &Path) -> Result<Option<Manifest>> {
    let path = manifest_path(cwd);

    let raw = match fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None);
        }
        Err(source) => return Err(Error::Io { path, source }),
    };

    let mut manifest: Manifest = serde_json::from_str(&raw)
        .map_err(|source| Error::ManifestMalformed { path: path.clone(), source })?;
    manifest.indent = detect_indent(&raw);
    manifest.validate()?;

    Ok(Some(manifest))
}

/// Write the manifest to `cwd`, using its detected (or default) indentation.
pub async fn write(manifest: &Manifest, cwd: &Path) -> Result<()> {
    let path = manifest_path(cwd);

    let indent = if manifest.indent.is_empty() {
        DEFAULT_INDENT
    } else {
        manifest.indent.as_str()
    };

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    manifest
        .serialize(&mut ser)
        .map_err(|source| Error::ManifestMalformed { path: path.clone(), source })?;
    buf.push(b'\n');

    fs::write(&path, buf)
        .await
        .map_err(|source| Error::Io { path, source })
}
