//! Ignore-file matcher (C8): a line-oriented reader for `.wpmignore` files producing
//! glob patterns used to filter files while packaging a release tarball.
//!
//! Not consumed by the install path in this revision; implemented and tested in full
//! because the ignore-file format is part of the external interface regardless.

use std::path::Path;

use glob::Pattern;
use tokio::fs;

use crate::error::{Error, Result};

/// The patterns declared by a `.wpmignore` file.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Pattern>,
}

impl IgnoreList {
    /// Read and parse a `.wpmignore` file at `path`. A missing file yields an empty
    /// list rather than an error.
    pub async fn read(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(Error::Io { path: path.to_owned(), source }),
        };

        Ok(Self::parse(&contents))
    }

    /// Parse ignore-file contents directly, skipping blank and `#`-prefixed lines.
    /// Lines that are not valid glob patterns are skipped rather than rejected, since
    /// a malformed ignore file should not block packaging.
    pub fn parse(contents: &str) -> Self {
        let patterns = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| Pattern::new(line).ok())
            .collect();

        Self { patterns }
    }

    /// Whether `relative_path` (forward-slash separated, relative to the package
    /// root) matches any ignore pattern.
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(relative_path))
    }

    /// The number of patterns successfully parsed.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no patterns were parsed.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
