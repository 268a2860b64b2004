use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::bitset::BitSet;
use crate::tags::TagIndexes;
use crate::tree::{split_path, PathTree};
use crate::Result;

/// Outcome of resolving a set of context paths
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextFilter {
    /// No context constraint (no paths, or only the root)
    Unconstrained,
    /// AND over these context tag keys. Empty when the paths resolve but
    /// none of their layers owns a context bitmap; nothing can match then.
    Keys(Vec<String>),
    /// At least one path does not resolve; nothing can match
    Unresolvable,
}

/// Turns context paths and feature keys into a candidate id set.
pub struct QueryEngine {
    tree: Arc<PathTree>,
    tags: TagIndexes,
}

impl QueryEngine {
    pub fn new(tree: Arc<PathTree>, tags: TagIndexes) -> Self {
        Self { tree, tags }
    }

    /// Union of the context keys along every path, in first-seen order.
    pub fn resolve_contexts<S: AsRef<str>>(&self, paths: &[S]) -> ContextFilter {
        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();
        let mut below_root = false;
        for path in paths {
            below_root |= !split_path(path.as_ref()).is_empty();
            let Some(path_keys) = self.tree.context_keys(path.as_ref()) else {
                debug!(path = path.as_ref(), "context path does not resolve");
                return ContextFilter::Unresolvable;
            };
            for key in path_keys {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        if keys.is_empty() && !below_root {
            ContextFilter::Unconstrained
        } else {
            ContextFilter::Keys(keys)
        }
    }

    /// Ids matching `AND(contexts) ∩ OR(features)`.
    ///
    /// Returns `None` when neither side constrains anything: the caller is
    /// expected to fall back to every stored document. A side that is given
    /// but matches nothing keeps the result empty; it is never dropped.
    pub fn matching<S: AsRef<str>, F: AsRef<str>>(
        &self,
        context_paths: &[S],
        feature_keys: &[F],
    ) -> Result<Option<BitSet>> {
        let contexts = match self.resolve_contexts(context_paths) {
            ContextFilter::Unresolvable => return Ok(Some(BitSet::new())),
            ContextFilter::Unconstrained => None,
            ContextFilter::Keys(keys) if keys.is_empty() => Some(BitSet::new()),
            ContextFilter::Keys(keys) => Some(self.tags.contexts.and(&keys)?),
        };
        let features = if feature_keys.is_empty() {
            None
        } else {
            Some(self.tags.features.or(feature_keys)?)
        };

        Ok(match (contexts, features) {
            (Some(c), Some(f)) => Some(c.and(&f)),
            (Some(only), None) | (None, Some(only)) => Some(only),
            (None, None) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdRanges;
    use crate::kv::{KvBackend, MemoryBackend, LAYERS_KS, TREE_KS};
    use crate::layers::{LayerOptions, LayerRegistry, LayerType};

    fn engine(backend: &MemoryBackend) -> (Arc<PathTree>, QueryEngine) {
        let tags = TagIndexes::open(backend, &IdRanges::default()).unwrap();
        let registry = Arc::new(
            LayerRegistry::open(backend.keyspace(LAYERS_KS).unwrap(), tags.clone()).unwrap(),
        );
        let tree = Arc::new(
            PathTree::open(backend.keyspace(TREE_KS).unwrap(), registry, true).unwrap(),
        );
        (tree.clone(), QueryEngine::new(tree, tags))
    }

    #[test]
    fn test_resolve_contexts() {
        let backend = MemoryBackend::new();
        let (tree, engine) = engine(&backend);
        tree.registry()
            .create("starred", LayerOptions::new(LayerType::Label))
            .unwrap();
        tree.insert("/work/starred").unwrap();
        tree.insert("/starred").unwrap();
        let work = tree.registry().get_by_name("work").unwrap();

        let none: &[&str] = &[];
        assert_eq!(engine.resolve_contexts(none), ContextFilter::Unconstrained);
        assert_eq!(engine.resolve_contexts(&["/"]), ContextFilter::Unconstrained);
        assert_eq!(
            engine.resolve_contexts(&["/work/starred"]),
            ContextFilter::Keys(vec![work.context_bitmap_key.unwrap()])
        );
        assert_eq!(engine.resolve_contexts(&["/starred"]), ContextFilter::Keys(vec![]));
        assert_eq!(
            engine.resolve_contexts(&["/", "/starred"]),
            ContextFilter::Keys(vec![])
        );
        assert_eq!(engine.resolve_contexts(&["/nowhere"]), ContextFilter::Unresolvable);

        assert_eq!(
            engine.matching(&["/starred"], none).unwrap(),
            Some(BitSet::new())
        );
        assert_eq!(engine.matching(&["/"], none).unwrap(), None);
    }
}
