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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a package is placed on disk and how its registry manifest is interpreted.
#[derive(Copy, Clone, Debug, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    /// A WordPress theme, installed under `<content_dir>/themes/<name>`.
    Theme,
    /// A WordPress plugin, installed under `<content_dir>/plugins/<name>`.
    Plugin,
    /// A must-use plugin, installed under `<content_dir>/mu-plugins/<name>`.
    MuPlugin,
}

impl PackageType {
    /// The subdirectory this package type is placed under, relative to the content directory.
    pub fn subdirectory(&self) -> &'static str {
        match self {
            PackageType::Theme => "themes",
            PackageType::Plugin => "plugins",
            PackageType::MuPlugin => "mu-plugins",
        }
    }
}

/// A `type` string that is not one of `theme | plugin | mu-plugin`.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid package type {0:?}, expected one of theme, plugin, mu-plugin")]
pub struct PackageTypeError(String);

impl FromStr for PackageType {
    type Err = PackageTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "theme" => Ok(PackageType::Theme),
            "plugin" => Ok(PackageType::Plugin),
            "mu-plugin" => Ok(PackageType::MuPlugin),
            other => Err(PackageTypeError(other.to_owned())),
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageType::Theme => "theme",
            PackageType::Plugin => "plugin",
            PackageType::MuPlugin => "mu-plugin",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_display_and_parse() {
        for kind in [PackageType::Theme, PackageType::Plugin, PackageType::MuPlugin] {
            let parsed: PackageType = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!("widget".parse::<PackageType>().is_err());
    }

    #[test]
    fn subdirectory_matches_spec_layout() {
        assert_eq!(PackageType::Theme.subdirectory(), "themes");
        assert_eq!(PackageType::Plugin.subdirectory(), "plugins");
        assert_eq!(PackageType::MuPlugin.subdirectory(), "mu-plugins");
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&PackageType::MuPlugin).unwrap();
        assert_eq!(json, "\"mu-plugin\"");
    }
}
