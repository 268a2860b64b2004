use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CanvasError;

/// Digest algorithms a document can be keyed by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Crc32,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Crc32 => "crc32",
        }
    }

    /// Lowercase hex digest of `input`
    pub fn digest(&self, input: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(input);
                hex::encode(hasher.finalize())
            }
            ChecksumAlgorithm::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(input);
                format!("{:08x}", hasher.finalize())
            }
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            "crc32" => Ok(ChecksumAlgorithm::Crc32),
            other => Err(CanvasError::Validation(format!(
                "unknown checksum algorithm '{}'",
                other
            ))),
        }
    }
}

/// Digest `input` with every algorithm, keyed by algorithm name.
pub fn compute_checksums(
    algorithms: &[ChecksumAlgorithm],
    input: &[u8],
) -> BTreeMap<String, String> {
    algorithms
        .iter()
        .map(|algo| (algo.as_str().to_string(), algo.digest(input)))
        .collect()
}
