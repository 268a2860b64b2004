use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CanvasError;
use crate::layers::ROOT_LAYER_ID;
use crate::Result;

/// One position in the context tree. `id` is the wrapped layer's id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::new(ROOT_LAYER_ID)
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_LAYER_ID
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, id: &str) -> Option<&TreeNode> {
        self.children.iter().find(|c| c.id == id)
    }

    pub fn child_mut(&mut self, id: &str) -> Option<&mut TreeNode> {
        self.children.iter_mut().find(|c| c.id == id)
    }

    pub fn has_child(&self, id: &str) -> bool {
        self.child(id).is_some()
    }

    /// Detach and return a direct child
    pub fn take_child(&mut self, id: &str) -> Option<TreeNode> {
        let pos = self.children.iter().position(|c| c.id == id)?;
        Some(self.children.remove(pos))
    }

    /// Attach `node` as a child. If a child with the same id already exists
    /// the two are merged, recursively, so ids stay unique per parent.
    pub fn merge_child(&mut self, node: TreeNode) {
        match self.child_mut(&node.id) {
            Some(existing) => {
                for grandchild in node.children {
                    existing.merge_child(grandchild);
                }
            }
            None => self.children.push(node),
        }
    }

    /// Descend along a chain of child ids
    pub fn descend(&self, ids: &[String]) -> Option<&TreeNode> {
        let mut node = self;
        for id in ids {
            node = node.child(id)?;
        }
        Some(node)
    }

    pub fn descend_mut(&mut self, ids: &[String]) -> Option<&mut TreeNode> {
        let mut node = self;
        for id in ids {
            node = node.child_mut(id)?;
        }
        Some(node)
    }

    /// Remove every descendant wrapping `id`, splicing its children into the
    /// parent. Returns how many nodes were removed.
    pub fn prune_id(&mut self, id: &str) -> usize {
        let mut removed = 0;
        let children = std::mem::take(&mut self.children);
        for mut child in children {
            removed += child.prune_id(id);
            if child.id == id {
                removed += 1;
                for grandchild in child.children {
                    self.merge_child(grandchild);
                }
            } else {
                self.merge_child(child);
            }
        }
        removed
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Every layer id in this subtree, root included
    pub fn layer_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            ids.insert(node.id.clone());
            stack.extend(node.children.iter());
        }
        ids
    }

    /// Structural checks for a tree loaded from outside
    pub fn validate(&self) -> Result<()> {
        if !self.is_root() {
            return Err(CanvasError::Integrity(format!(
                "tree root must have id '{}', found '{}'",
                ROOT_LAYER_ID, self.id
            )));
        }
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            let mut seen = HashSet::new();
            for child in &node.children {
                if child.is_root() {
                    return Err(CanvasError::Integrity(
                        "root node appears as a child".to_string(),
                    ));
                }
                if !seen.insert(child.id.as_str()) {
                    return Err(CanvasError::Integrity(format!(
                        "duplicate child '{}' under '{}'",
                        child.id, node.id
                    )));
                }
                stack.push(child);
            }
        }
        Ok(())
    }
}
