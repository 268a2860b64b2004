//! Context tree: slash-delimited paths of layer names.
//!
//! The whole tree is persisted as one JSON document after every mutation.
//! A node's path is built from layer names; the node itself stores only the
//! layer id, so a layer rename shows up at every path it occupies.

mod node;

pub use node::TreeNode;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::CanvasError;
use crate::kv::KvStore;
use crate::layers::{normalize_name, Layer, LayerOptions, LayerRegistry, ROOT_LAYER_ID};
use crate::Result;

const TREE_KEY: &[u8] = b"tree";

/// Split a path into its trimmed, non-empty segments. `/` and `""` are root.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Join layer names into a path
pub fn join_path<S: AsRef<str>>(names: &[S]) -> String {
    let mut out = String::new();
    for name in names {
        out.push('/');
        out.push_str(name.as_ref());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// In-memory context tree over a [`LayerRegistry`].
pub struct PathTree {
    registry: Arc<LayerRegistry>,
    store: Arc<dyn KvStore>,
    root: RwLock<TreeNode>,
    auto_create_layers: bool,
}

impl PathTree {
    pub fn open(
        store: Arc<dyn KvStore>,
        registry: Arc<LayerRegistry>,
        auto_create_layers: bool,
    ) -> Result<Self> {
        let root = match store.get(TREE_KEY)? {
            Some(bytes) => {
                let root: TreeNode = serde_json::from_slice(&bytes)?;
                Self::check_tree(&registry, &root)?;
                root
            }
            None => TreeNode::root(),
        };
        registry.set_placed(root.layer_ids());
        info!(nodes = root.node_count(), "context tree loaded");
        Ok(Self {
            registry,
            store,
            root: RwLock::new(root),
            auto_create_layers,
        })
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    fn check_tree(registry: &LayerRegistry, root: &TreeNode) -> Result<()> {
        root.validate()?;
        for id in root.layer_ids() {
            if registry.get_by_id(&id).is_none() {
                warn!(id = %id, "tree references unknown layer");
                return Err(CanvasError::Integrity(format!(
                    "tree references unknown layer id '{}'",
                    id
                )));
            }
        }
        Ok(())
    }

    fn persist(&self, root: &TreeNode) -> Result<()> {
        let bytes = serde_json::to_vec(root)?;
        self.store.put(TREE_KEY, &bytes)?;
        self.registry.set_placed(root.layer_ids());
        Ok(())
    }

    /// Resolve a path to the chain of layer ids below the root.
    fn resolve(&self, root: &TreeNode, path: &str) -> Option<Vec<String>> {
        let mut ids = Vec::new();
        let mut node = root;
        for segment in split_path(path) {
            let layer = self.registry.get_by_name(segment)?;
            node = node.child(&layer.id)?;
            ids.push(layer.id);
        }
        Some(ids)
    }

    fn resolve_existing(&self, root: &TreeNode, path: &str) -> Result<Vec<String>> {
        self.resolve(root, path)
            .ok_or_else(|| CanvasError::PathNotFound(path.to_string()))
    }

    /// Normalized segment names; a segment that normalizes to nothing makes
    /// the whole path invalid.
    fn normalized_segments(path: &str) -> Result<Vec<String>> {
        split_path(path)
            .into_iter()
            .map(|s| normalize_name(s).map_err(|_| CanvasError::InvalidPath(path.to_string())))
            .collect()
    }

    fn non_root_segments(path: &str, action: &str) -> Result<Vec<String>> {
        let segments = Self::normalized_segments(path)?;
        if segments.is_empty() {
            return Err(CanvasError::Validation(format!("cannot {} the root", action)));
        }
        Ok(segments)
    }

    /// Insert a path using the configured layer auto-creation policy.
    pub fn insert(&self, path: &str) -> Result<bool> {
        self.insert_with(path, self.auto_create_layers)
    }

    /// Insert a path, creating missing nodes. Returns true when at least one
    /// node was added, false when the path already existed.
    pub fn insert_with(&self, path: &str, auto_create_layers: bool) -> Result<bool> {
        Self::normalized_segments(path)?;
        let mut layers = Vec::new();
        for segment in split_path(path) {
            let layer = if auto_create_layers {
                self.registry.ensure(segment, LayerOptions::context())?
            } else {
                self.registry
                    .get_by_name(segment)
                    .ok_or_else(|| CanvasError::LayerNotFound(segment.to_string()))?
            };
            layers.push(layer);
        }

        let mut root = self.root.write();
        let mut changed = false;
        let mut node = &mut *root;
        for layer in &layers {
            if !node.has_child(&layer.id) {
                node.children.push(TreeNode::new(layer.id.clone()));
                changed = true;
            }
            node = match node.child_mut(&layer.id) {
                Some(child) => child,
                None => return Err(CanvasError::Integrity("inserted node vanished".into())),
            };
        }
        if changed {
            self.persist(&root)?;
            debug!(path, "inserted path");
        }
        Ok(changed)
    }

    /// Snapshot of the node at `path`; `None` when any segment is unresolvable.
    pub fn get_node(&self, path: &str) -> Option<TreeNode> {
        let root = self.root.read();
        let ids = self.resolve(&root, path)?;
        root.descend(&ids).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.get_node(path).is_some()
    }

    /// Layer wrapped by the node at `path`
    pub fn layer_at(&self, path: &str) -> Option<Layer> {
        let node = self.get_node(path)?;
        self.registry.get_by_id(&node.id)
    }

    /// Move the node at `from` under the parent path `to`, creating `to` when
    /// missing.
    ///
    /// Non-recursive moves take only the node: its children are spliced into
    /// the old parent. Recursive moves carry the whole subtree. Either way
    /// `to` may not lie inside the moved subtree.
    pub fn move_node(&self, from: &str, to: &str, recursive: bool) -> Result<()> {
        let from_names = Self::non_root_segments(from, "move")?;
        let to_names = Self::normalized_segments(to)?;
        if to_names.starts_with(&from_names) {
            return Err(CanvasError::Conflict(format!(
                "cannot move '{}' into its own subtree '{}'",
                from, to
            )));
        }
        if self.get_node(from).is_none() {
            return Err(CanvasError::PathNotFound(from.to_string()));
        }
        self.insert(to)?;

        let mut root = self.root.write();
        let from_ids = self.resolve_existing(&root, from)?;
        let to_ids = self.resolve_existing(&root, to)?;
        let (node_id, parent_ids) = from_ids
            .split_last()
            .ok_or_else(|| CanvasError::Validation("cannot move the root".to_string()))?;

        let parent = root
            .descend_mut(parent_ids)
            .ok_or_else(|| CanvasError::PathNotFound(from.to_string()))?;
        let mut node = parent
            .take_child(node_id)
            .ok_or_else(|| CanvasError::PathNotFound(from.to_string()))?;
        if !recursive {
            for child in std::mem::take(&mut node.children) {
                parent.merge_child(child);
            }
        }

        let dest = root
            .descend_mut(&to_ids)
            .ok_or_else(|| CanvasError::PathNotFound(to.to_string()))?;
        dest.merge_child(node);
        self.persist(&root)?;
        debug!(from, to, recursive, "moved node");
        Ok(())
    }

    /// Copy the node at `from` under `to`; with `recursive` the subtree comes along.
    pub fn copy_node(&self, from: &str, to: &str, recursive: bool) -> Result<()> {
        Self::non_root_segments(from, "copy")?;
        let mut node = self
            .get_node(from)
            .ok_or_else(|| CanvasError::PathNotFound(from.to_string()))?;
        if !recursive {
            node.children.clear();
        }
        self.insert(to)?;

        let mut root = self.root.write();
        let to_ids = self.resolve_existing(&root, to)?;
        let dest = root
            .descend_mut(&to_ids)
            .ok_or_else(|| CanvasError::PathNotFound(to.to_string()))?;
        dest.merge_child(node);
        self.persist(&root)?;
        debug!(from, to, recursive, "copied node");
        Ok(())
    }

    /// Detach the node at `path`. Non-recursive removal hands its children to
    /// the parent; recursive removal drops the subtree.
    pub fn remove(&self, path: &str, recursive: bool) -> Result<()> {
        Self::non_root_segments(path, "remove")?;
        let mut root = self.root.write();
        let ids = self.resolve_existing(&root, path)?;
        let (node_id, parent_ids) = ids
            .split_last()
            .ok_or_else(|| CanvasError::Validation("cannot remove the root".to_string()))?;
        let parent = root
            .descend_mut(parent_ids)
            .ok_or_else(|| CanvasError::PathNotFound(path.to_string()))?;
        let node = parent
            .take_child(node_id)
            .ok_or_else(|| CanvasError::PathNotFound(path.to_string()))?;
        if !recursive {
            for child in node.children {
                parent.merge_child(child);
            }
        }
        self.persist(&root)?;
        debug!(path, recursive, "removed node");
        Ok(())
    }

    /// Rename the layer at `path`. The tree shape is untouched, but every path
    /// through that layer changes.
    pub fn rename(&self, path: &str, new_name: &str) -> Result<Layer> {
        Self::non_root_segments(path, "rename")?;
        let layer = self
            .layer_at(path)
            .ok_or_else(|| CanvasError::PathNotFound(path.to_string()))?;
        self.registry.rename(&layer.name, new_name)
    }

    /// Drop every node wrapping `layer_id`, splicing children upward.
    pub fn detach_layer(&self, layer_id: &str) -> Result<usize> {
        if layer_id == ROOT_LAYER_ID {
            return Err(CanvasError::Validation("cannot detach the root".to_string()));
        }
        let mut root = self.root.write();
        let removed = root.prune_id(layer_id);
        if removed > 0 {
            self.persist(&root)?;
            debug!(layer_id, removed, "detached layer from tree");
        }
        Ok(removed)
    }

    /// Context tag keys along `path`, root excluded. `None` if unresolvable.
    pub fn context_keys(&self, path: &str) -> Option<Vec<String>> {
        let root = self.root.read();
        let ids = self.resolve(&root, path)?;
        drop(root);
        Some(
            ids.iter()
                .filter_map(|id| self.registry.get_by_id(id))
                .filter_map(|layer| layer.context_bitmap_key)
                .collect(),
        )
    }

    fn layer_name(&self, id: &str) -> String {
        match self.registry.get_by_id(id) {
            Some(layer) => layer.name,
            None => {
                warn!(id, "tree node without registry entry");
                id.to_string()
            }
        }
    }

    /// Path of every leaf, depth first.
    pub fn list_paths(&self) -> Vec<String> {
        let root = self.root.read();
        let mut out = Vec::new();
        let mut stack: Vec<(&TreeNode, Vec<String>)> = root
            .children
            .iter()
            .rev()
            .map(|c| (c, vec![self.layer_name(&c.id)]))
            .collect();
        while let Some((node, names)) = stack.pop() {
            if node.is_leaf() {
                out.push(join_path(&names));
                continue;
            }
            for child in node.children.iter().rev() {
                let mut child_names = names.clone();
                child_names.push(self.layer_name(&child.id));
                stack.push((child, child_names));
            }
        }
        out
    }

    /// Every path (inner nodes included) at which `layer_id` appears
    pub fn paths_for_layer(&self, layer_id: &str) -> Vec<String> {
        let root = self.root.read();
        let mut out = Vec::new();
        let mut stack: Vec<(&TreeNode, Vec<String>)> = vec![(&*root, Vec::new())];
        while let Some((node, names)) = stack.pop() {
            if node.id == layer_id {
                out.push(join_path(&names));
            }
            for child in &node.children {
                let mut child_names = names.clone();
                child_names.push(self.layer_name(&child.id));
                stack.push((child, child_names));
            }
        }
        out.sort();
        out
    }

    /// Clone of the whole tree
    pub fn snapshot(&self) -> TreeNode {
        self.root.read().clone()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.root.read())?)
    }

    /// Replace the tree with a serialized one, after validating it.
    pub fn from_json(&self, json: &str) -> Result<()> {
        let parsed: TreeNode = serde_json::from_str(json)?;
        Self::check_tree(&self.registry, &parsed)?;
        let mut root = self.root.write();
        self.persist(&parsed)?;
        *root = parsed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdRanges;
    use crate::kv::{KvBackend, MemoryBackend, LAYERS_KS, TREE_KS};
    use crate::layers::LayerType;
    use crate::tags::TagIndexes;

    fn open_tree(backend: &MemoryBackend) -> PathTree {
        let tags = TagIndexes::open(backend, &IdRanges::default()).unwrap();
        let registry =
            Arc::new(LayerRegistry::open(backend.keyspace(LAYERS_KS).unwrap(), tags).unwrap());
        PathTree::open(backend.keyspace(TREE_KS).unwrap(), registry, true).unwrap()
    }

    #[test]
    fn test_split_and_join() {
        assert_eq!(split_path("/a//b/ c /"), vec!["a", "b", "c"]);
        assert!(split_path("/").is_empty());
        assert_eq!(join_path(&["a", "b"]), "/a/b");
        assert_eq!(join_path::<&str>(&[]), "/");
    }

    #[test]
    fn test_insert_and_get() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);

        assert!(tree.insert("/work/project").unwrap());
        assert!(!tree.insert("/Work/Project").unwrap());
        assert!(tree.get_node("/work").is_some());
        assert!(tree.get_node("/work/project").unwrap().is_leaf());
        assert!(tree.get_node("/work/other").is_none());
        assert!(tree.get_node("/").unwrap().is_root());
        assert_eq!(tree.list_paths(), vec!["/work/project".to_string()]);
    }

    #[test]
    fn test_invalid_segment() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        assert!(matches!(
            tree.insert("/work/???"),
            Err(CanvasError::InvalidPath(p)) if p == "/work/???"
        ));
        assert!(tree.registry().is_empty());
    }

    #[test]
    fn test_insert_without_auto_create() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        assert!(matches!(
            tree.insert_with("/missing", false),
            Err(CanvasError::LayerNotFound(name)) if name == "missing"
        ));
        tree.registry()
            .create("known", LayerOptions::context())
            .unwrap();
        assert!(tree.insert_with("/known", false).unwrap());
    }

    #[test]
    fn test_same_layer_at_many_paths() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/work/reports").unwrap();
        tree.insert("/home/reports").unwrap();

        let reports = tree.layer_at("/work/reports").unwrap();
        assert_eq!(tree.layer_at("/home/reports").unwrap().id, reports.id);
        assert_eq!(
            tree.paths_for_layer(&reports.id),
            vec!["/home/reports".to_string(), "/work/reports".to_string()]
        );
        assert_eq!(tree.registry().len(), 3);
    }

    #[test]
    fn test_non_recursive_move_splices_children() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/a/b/d").unwrap();

        tree.move_node("/a/b", "/c", false).unwrap();
        assert!(tree.get_node("/c").is_some());
        assert!(tree.get_node("/c/b").unwrap().is_leaf());
        assert!(tree.get_node("/a/d").is_some());
        assert!(tree.get_node("/a/b/d").is_none());
        assert!(tree.get_node("/a/b").is_none());
    }

    #[test]
    fn test_recursive_move_keeps_subtree() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/a/b/d").unwrap();

        tree.move_node("/a/b", "/c", true).unwrap();
        assert!(tree.get_node("/c/b/d").is_some());
        assert!(tree.get_node("/a").unwrap().is_leaf());
    }

    #[test]
    fn test_move_into_own_subtree_is_conflict() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/a/b/d").unwrap();

        for recursive in [true, false] {
            assert!(matches!(
                tree.move_node("/a/b", "/a/b/d", recursive),
                Err(CanvasError::Conflict(_))
            ));
        }
        assert!(matches!(
            tree.move_node("/", "/x", true),
            Err(CanvasError::Validation(_))
        ));
        assert!(matches!(
            tree.move_node("/nope", "/x", true),
            Err(CanvasError::PathNotFound(_))
        ));
        assert!(tree.get_node("/a/b/d").is_some());
    }

    #[test]
    fn test_copy() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/a/b/d").unwrap();

        tree.copy_node("/a/b", "/x", false).unwrap();
        assert!(tree.get_node("/x/b").unwrap().is_leaf());
        tree.copy_node("/a/b", "/y", true).unwrap();
        assert!(tree.get_node("/y/b/d").is_some());
        assert!(tree.get_node("/a/b/d").is_some());
    }

    #[test]
    fn test_remove() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/a/b/d").unwrap();
        tree.insert("/a/e/f").unwrap();

        tree.remove("/a/b", false).unwrap();
        assert!(tree.get_node("/a/d").is_some());
        assert!(tree.get_node("/a/b").is_none());

        tree.remove("/a/e", true).unwrap();
        assert!(tree.get_node("/a/e").is_none());
        assert!(tree.get_node("/a/f").is_none());

        assert!(matches!(tree.remove("/", true), Err(CanvasError::Validation(_))));
        assert!(matches!(
            tree.remove("/zzz", false),
            Err(CanvasError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_rename_changes_paths_not_shape() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/work/drafts").unwrap();
        let before = tree.snapshot();

        tree.rename("/work/drafts", "final").unwrap();
        assert_eq!(tree.snapshot(), before);
        assert_eq!(tree.list_paths(), vec!["/work/final".to_string()]);
        assert!(tree.get_node("/work/drafts").is_none());
    }

    #[test]
    fn test_context_keys_skip_label_layers() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.registry()
            .create("tagged", LayerOptions::new(LayerType::Label))
            .unwrap();
        tree.insert("/work/tagged").unwrap();

        let work = tree.layer_at("/work").unwrap();
        assert_eq!(
            tree.context_keys("/work/tagged"),
            Some(vec![work.id.clone()])
        );
        assert_eq!(tree.context_keys("/"), Some(Vec::new()));
        assert_eq!(tree.context_keys("/nowhere"), None);
    }

    #[test]
    fn test_persistence_and_json_round_trip() {
        let backend = MemoryBackend::new();
        let json = {
            let tree = open_tree(&backend);
            tree.insert("/a/b").unwrap();
            tree.insert("/a/c").unwrap();
            tree.insert("/d").unwrap();
            tree.to_json().unwrap()
        };

        let reopened = open_tree(&backend);
        assert_eq!(reopened.to_json().unwrap(), json);
        assert_eq!(
            reopened.list_paths(),
            vec!["/a/b".to_string(), "/a/c".to_string(), "/d".to_string()]
        );

        reopened.from_json(&json).unwrap();
        assert_eq!(reopened.to_json().unwrap(), json);
    }

    #[test]
    fn test_from_json_rejects_unknown_layers() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        let err = tree
            .from_json(r#"{"id":"/","children":[{"id":"no-such-layer","children":[]}]}"#)
            .unwrap_err();
        assert!(matches!(err, CanvasError::Integrity(_)));
    }

    #[test]
    fn test_detach_layer() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/a/x/k").unwrap();
        tree.insert("/b/x").unwrap();
        let x = tree.layer_at("/a/x").unwrap();

        assert_eq!(tree.detach_layer(&x.id).unwrap(), 2);
        assert!(tree.get_node("/a/k").is_some());
        assert!(tree.paths_for_layer(&x.id).is_empty());
    }

    #[test]
    fn test_registry_refuses_removing_placed_layer() {
        let backend = MemoryBackend::new();
        let tree = open_tree(&backend);
        tree.insert("/a/b").unwrap();
        let b = tree.layer_at("/a/b").unwrap();

        assert!(matches!(tree.registry().remove("b"), Err(CanvasError::Conflict(_))));
        assert_eq!(tree.list_paths(), vec!["/a/b".to_string()]);

        // A reopened tree still finds every layer it references
        let reopened = open_tree(&backend);
        assert_eq!(reopened.list_paths(), vec!["/a/b".to_string()]);
        assert!(reopened.registry().is_placed(&b.id));

        reopened.remove("/a/b", false).unwrap();
        assert!(!reopened.registry().is_placed(&b.id));
        assert_eq!(reopened.registry().remove("b").unwrap().id, b.id);
        assert!(open_tree(&backend).get_node("/a").is_some());
    }
}
