//! Persistent tag-key -> bitmap index, partitioned into namespaces.
//!
//! Every namespace owns its own keyspace and id range:
//! - `internal`: system tags over reserved low ids
//! - `contexts`: one bitmap per layer context key
//! - `features`: schema and caller-supplied feature tags
//! - `filters`: layer-owned filter tags

mod index;

pub use index::TagIndex;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::IdRanges;
use crate::kv::KvBackend;
use crate::Result;

/// Half-open id range `[min, max)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

impl IdRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, id: u32) -> bool {
        id >= self.min && id < self.max
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagNamespace {
    Internal,
    Contexts,
    Features,
    Filters,
}

impl TagNamespace {
    pub const ALL: [TagNamespace; 4] = [
        TagNamespace::Internal,
        TagNamespace::Contexts,
        TagNamespace::Features,
        TagNamespace::Filters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagNamespace::Internal => "internal",
            TagNamespace::Contexts => "contexts",
            TagNamespace::Features => "features",
            TagNamespace::Filters => "filters",
        }
    }

    /// Name of the backing keyspace
    pub fn keyspace(&self) -> String {
        format!("bitmaps_{}", self.as_str())
    }
}

impl fmt::Display for TagNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four namespace indexes, shared by the registry and the document store.
#[derive(Clone)]
pub struct TagIndexes {
    pub internal: Arc<TagIndex>,
    pub contexts: Arc<TagIndex>,
    pub features: Arc<TagIndex>,
    pub filters: Arc<TagIndex>,
}

impl TagIndexes {
    pub fn open(backend: &dyn KvBackend, ranges: &IdRanges) -> Result<Self> {
        let open = |ns: TagNamespace| -> Result<Arc<TagIndex>> {
            let store = backend.keyspace(&ns.keyspace())?;
            Ok(Arc::new(TagIndex::new(ns, ranges.for_namespace(ns), store)))
        };
        Ok(Self {
            internal: open(TagNamespace::Internal)?,
            contexts: open(TagNamespace::Contexts)?,
            features: open(TagNamespace::Features)?,
            filters: open(TagNamespace::Filters)?,
        })
    }

    pub fn get(&self, namespace: TagNamespace) -> &Arc<TagIndex> {
        match namespace {
            TagNamespace::Internal => &self.internal,
            TagNamespace::Contexts => &self.contexts,
            TagNamespace::Features => &self.features,
            TagNamespace::Filters => &self.filters,
        }
    }

    /// Remove `id` from every document-bearing namespace.
    /// Returns the `(namespace, tag)` pairs that were modified.
    pub fn untick_everywhere(&self, id: u32) -> Result<Vec<(TagNamespace, String)>> {
        let mut touched = Vec::new();
        for ns in [
            TagNamespace::Contexts,
            TagNamespace::Features,
            TagNamespace::Filters,
        ] {
            for tag in self.get(ns).untick_all(id)? {
                touched.push((ns, tag));
            }
        }
        Ok(touched)
    }
}
