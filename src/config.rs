use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::schema::ChecksumAlgorithm;
use crate::tags::{IdRange, TagNamespace};

/// Id ranges per tag namespace.
///
/// Bit-exact with existing data: internal tags live in `[1_000, 1_000_000)`,
/// everything else (and every document id) lives above that ceiling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRanges {
    pub internal: IdRange,
    pub contexts: IdRange,
    pub features: IdRange,
    pub filters: IdRange,
}

pub const INTERNAL_ID_MIN: u32 = 1_000;
pub const INTERNAL_ID_MAX: u32 = 1_000_000;

impl Default for IdRanges {
    fn default() -> Self {
        let documents = IdRange::new(INTERNAL_ID_MAX + 1, u32::MAX);
        Self {
            internal: IdRange::new(INTERNAL_ID_MIN, INTERNAL_ID_MAX),
            contexts: documents,
            features: documents,
            filters: documents,
        }
    }
}

impl IdRanges {
    pub fn for_namespace(&self, namespace: TagNamespace) -> IdRange {
        match namespace {
            TagNamespace::Internal => self.internal,
            TagNamespace::Contexts => self.contexts,
            TagNamespace::Features => self.features,
            TagNamespace::Filters => self.filters,
        }
    }

    /// First id handed to a document: one past the internal ceiling.
    pub fn first_document_id(&self) -> u32 {
        self.internal.max + 1
    }
}

/// Where the key-value data lives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Persistent,
    InMemory,
}

/// Top-level configuration for a canvas store
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub data_dir: PathBuf,
    pub storage: StorageMode,
    pub ranges: IdRanges,
    pub primary_checksum: ChecksumAlgorithm,
    pub checksum_algorithms: Vec<ChecksumAlgorithm>,
    pub auto_create_layers: bool,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            storage: StorageMode::Persistent,
            ranges: IdRanges::default(),
            primary_checksum: ChecksumAlgorithm::Sha256,
            checksum_algorithms: vec![ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Crc32],
            auto_create_layers: true,
        }
    }
}

impl CanvasConfig {
    /// Persistent store rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Throwaway store kept in process memory
    pub fn in_memory() -> Self {
        Self {
            storage: StorageMode::InMemory,
            ..Default::default()
        }
    }

    /// Load a JSON config file; missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config = serde_json::from_slice(&bytes)?;
        Ok(config)
    }

    pub fn with_ranges(mut self, ranges: IdRanges) -> Self {
        self.ranges = ranges;
        self
    }

    pub fn with_primary_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.primary_checksum = algorithm;
        if !self.checksum_algorithms.contains(&algorithm) {
            self.checksum_algorithms.insert(0, algorithm);
        }
        self
    }

    pub fn with_auto_create_layers(mut self, enabled: bool) -> Self {
        self.auto_create_layers = enabled;
        self
    }

    /// Directory holding the fjall keyspaces
    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("canvas")
    }
}
