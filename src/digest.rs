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

//! Content digests used by the lockfile and the content-addressed cache.
//!
//! Digests are displayed and stored as `sha256:<base64>`, matching the wire/lockfile
//! format in the external interface. The cache filename rule additionally substitutes
//! `/` with `_` (see [`Digest::cache_file_stem`]); that substitution is cosmetic and is
//! never reflected in the canonical string form.

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{de::Visitor, Deserialize, Serialize};
use sha2::Digest as _;
use strum::{Display, EnumString};
use thiserror::Error;

/// Supported digest algorithms. Only SHA-256 is specified today; the enum exists so the
/// wire format (`algo:digest`) stays forward-extensible without a breaking change.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
pub enum DigestAlgorithm {
    /// SHA-2 with 256 bits.
    #[serde(rename = "sha256")]
    #[strum(serialize = "sha256")]
    Sha256,
}

impl DigestAlgorithm {
    /// Digest some bytes using this algorithm.
    pub fn digest(&self, data: &[u8]) -> Digest {
        let raw = match self {
            DigestAlgorithm::Sha256 => sha2::Sha256::new().chain_update(data).finalize().to_vec(),
        };

        Digest {
            algorithm: *self,
            raw,
        }
    }

    /// A running accumulator for this algorithm, used to hash a byte stream incrementally.
    pub fn accumulator(&self) -> DigestAccumulator {
        match self {
            DigestAlgorithm::Sha256 => DigestAccumulator {
                algorithm: *self,
                hasher: sha2::Sha256::new(),
            },
        }
    }
}

/// Error raised when a `DigestAlgorithm` string is not recognized.
#[derive(Error, Debug)]
pub enum DigestAlgorithmError {
    /// An algorithm name that this implementation does not support.
    #[error("unsupported digest algorithm: {0}")]
    Unsupported(String),
}

/// Incrementally hashes bytes read off a stream, yielding a [`Digest`] at the end.
pub struct DigestAccumulator {
    algorithm: DigestAlgorithm,
    hasher: sha2::Sha256,
}

impl DigestAccumulator {
    /// Feed a chunk of bytes into the accumulator.
    pub fn update(&mut self, chunk: &[u8]) {
        sha2::Digest::update(&mut self.hasher, chunk);
    }

    /// Finalize the accumulator into a [`Digest`].
    pub fn finish(self) -> Digest {
        Digest {
            algorithm: self.algorithm,
            raw: self.hasher.finalize().to_vec(),
        }
    }
}

/// A content digest: an algorithm tag plus the raw hash bytes.
///
/// ```rust
/// use wpm_core::digest::{Digest, DigestAlgorithm};
///
/// let digest = DigestAlgorithm::Sha256.digest(b"hello");
/// assert_eq!(digest, digest.to_string().parse().unwrap());
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    raw: Vec<u8>,
}

impl Digest {
    /// Build a digest from an algorithm and its already-base64-encoded representation.
    pub fn from_parts(algorithm: DigestAlgorithm, base64_digest: &str) -> Result<Self, DigestError> {
        let raw = BASE64
            .decode(base64_digest)
            .map_err(DigestError::Base64)?;
        Ok(Self { algorithm, raw })
    }

    /// The algorithm used to produce this digest.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The cache filename stem for this digest: base64 with `/` replaced by `_`, no suffix.
    pub fn cache_file_stem(&self) -> String {
        BASE64.encode(&self.raw).replace('/', "_")
    }
}

/// Error parsing a [`Digest`] from its string form.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DigestError {
    #[error("missing ':' delimiter between algorithm and digest")]
    MissingDelimiter,
    #[error(transparent)]
    Algorithm(#[from] DigestAlgorithmError),
    #[error("invalid base64 digest")]
    Base64(#[source] base64::DecodeError),
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some((algorithm_str, digest_str)) = input.split_once(':') else {
            return Err(DigestError::MissingDelimiter);
        };
        let algorithm: DigestAlgorithm = algorithm_str
            .parse()
            .map_err(|_| DigestAlgorithmError::Unsupported(algorithm_str.into()))?;
        Self::from_parts(algorithm, digest_str)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, BASE64.encode(&self.raw))
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

struct DigestVisitor;

impl Visitor<'_> for DigestVisitor {
    type Value = Digest;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a base64-encoded cryptographic digest, e.g. sha256:AAA...")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(DigestVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_tokens, Token};

    #[test]
    fn can_parse_digest_algorithm() {
        assert!(matches!("sha256".parse(), Ok(DigestAlgorithm::Sha256)));
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }

    #[test]
    fn can_roundtrip_digest() {
        let digest = DigestAlgorithm::Sha256.digest(b"hello");
        let rendered = digest.to_string();
        let parsed: Digest = rendered.parse().unwrap();
        assert_eq!(digest, parsed);
        assert_eq!(parsed.to_string(), rendered);
    }

    #[test]
    fn cannot_parse_invalid_digest() {
        assert!(matches!(
            "md5:abc".parse::<Digest>(),
            Err(DigestError::Algorithm(_))
        ));
        assert!(matches!(
            "".parse::<Digest>(),
            Err(DigestError::MissingDelimiter)
        ));
        assert!(matches!(
            "sha256:not base64!!".parse::<Digest>(),
            Err(DigestError::Base64(_))
        ));
    }

    #[test]
    fn can_serialize() {
        let digest = DigestAlgorithm::Sha256.digest(b"hello");
        let rendered = digest.to_string();
        assert_tokens(&digest, &[Token::Str(&rendered)]);
    }

    #[test]
    fn cache_file_stem_replaces_slash() {
        // Find bytes whose base64 encoding contains a '/' for a concrete regression check.
        let digest = DigestAlgorithm::Sha256.digest(b"buffrs-to-wpm-slash-fixture");
        let stem = digest.cache_file_stem();
        assert!(!stem.contains('/'));
    }

    #[test]
    fn accumulator_matches_one_shot_digest() {
        let mut acc = DigestAlgorithm::Sha256.accumulator();
        acc.update(b"hel");
        acc.update(b"lo");
        let streamed = acc.finish();
        let direct = DigestAlgorithm::Sha256.digest(b"hello");
        assert_eq!(streamed, direct);
    }
}
