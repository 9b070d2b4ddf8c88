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

use std::{fmt, ops::Deref, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum length of a package name, in bytes.
pub const MIN_LENGTH: usize = 3;
/// Maximum length of a package name, in bytes.
pub const MAX_LENGTH: usize = 164;

/// A validated package name: lowercase-alphanumeric segments joined by `-`.
#[derive(Clone, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

/// Why a candidate string failed to validate as a [`PackageName`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PackageNameError {
    /// The name was shorter than [`MIN_LENGTH`].
    #[error("package name must be at least {MIN_LENGTH} characters long, got {0}")]
    TooShort(usize),
    /// The name was longer than [`MAX_LENGTH`].
    #[error("package name must be at most {MAX_LENGTH} characters long, got {0}")]
    TooLong(usize),
    /// The first character was not a lowercase ASCII letter or digit.
    #[error("package name must start with a lowercase letter or digit, found {0:?}")]
    InvalidStart(char),
    /// A character other than `a-z`, `0-9` or `-` was found.
    #[error("package name contains invalid character {found:?} at position {pos}")]
    InvalidCharacter {
        /// The offending character.
        found: char,
        /// Byte position of the offending character.
        pos: usize,
    },
}

impl PackageName {
    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(raw: &str) -> Result<(), PackageNameError> {
        let len = raw.len();

        if len < MIN_LENGTH {
            return Err(PackageNameError::TooShort(len));
        }
        if len > MAX_LENGTH {
            return Err(PackageNameError::TooLong(len));
        }

        let first = raw.chars().next().expect("length already checked");
        if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
            return Err(PackageNameError::InvalidStart(first));
        }

        for (pos, c) in raw.char_indices().skip(1) {
            if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
                return Err(PackageNameError::InvalidCharacter { found: c, pos });
            }
        }

        Ok(())
    }
}

impl TryFrom<String> for PackageName {
    type Error = PackageNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for PackageName {
    type Error = PackageNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl FromStr for PackageName {
    type Err = PackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl From<PackageName> for String {
    fn from(value: PackageName) -> Self {
        value.0
    }
}

impl Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PackageName").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_lowercase() {
        assert!(PackageName::try_from("hello-dolly").is_ok());
    }

    #[test]
    fn boundary_lengths() {
        assert_eq!(
            PackageName::try_from("ab"),
            Err(PackageNameError::TooShort(2))
        );
        assert!(PackageName::try_from("abc").is_ok());

        let at_max = "a".repeat(MAX_LENGTH);
        assert!(PackageName::try_from(at_max.as_str()).is_ok());

        let over_max = "a".repeat(MAX_LENGTH + 1);
        assert_eq!(
            PackageName::try_from(over_max.as_str()),
            Err(PackageNameError::TooLong(MAX_LENGTH + 1))
        );
    }

    #[test]
    fn rejects_uppercase_start() {
        assert_eq!(
            PackageName::try_from("Abc"),
            Err(PackageNameError::InvalidStart('A'))
        );
    }

    #[test]
    fn rejects_underscore() {
        assert_eq!(
            PackageName::try_from("ab_c"),
            Err(PackageNameError::InvalidCharacter {
                found: '_',
                pos: 2
            })
        );
    }

    #[test]
    fn allows_digit_start() {
        assert!(PackageName::try_from("7-up-clone").is_ok());
    }

    #[test]
    fn deref_and_display_agree() {
        let name = PackageName::try_from("hello-dolly").unwrap();
        assert_eq!(&*name, "hello-dolly");
        assert_eq!(name.to_string(), "hello-dolly");
    }
}
