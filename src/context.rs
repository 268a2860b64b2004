//! A cursor into the tree: the active path every document call is scoped to.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::documents::DocumentStore;
use crate::error::CanvasError;
use crate::models::{DocumentId, ListOptions, Listing, NewDocument};
use crate::tree::{join_path, split_path, PathTree};
use crate::Result;

/// Active path plus the stores it reads and writes through.
pub struct Context {
    tree: Arc<PathTree>,
    documents: Arc<DocumentStore>,
    path: RwLock<String>,
}

impl Context {
    /// Context at `path`; the path is created in the tree when missing.
    pub fn open(tree: Arc<PathTree>, documents: Arc<DocumentStore>, path: &str) -> Result<Self> {
        let ctx = Self {
            tree,
            documents,
            path: RwLock::new("/".to_string()),
        };
        ctx.set_path(path)?;
        Ok(ctx)
    }

    pub fn path(&self) -> String {
        self.path.read().clone()
    }

    /// Switch to `path`, creating it when missing.
    pub fn set_path(&self, path: &str) -> Result<()> {
        self.tree.insert(path)?;
        if !self.tree.exists(path) {
            return Err(CanvasError::PathNotFound(path.to_string()));
        }
        let names: Vec<String> = split_path(path)
            .into_iter()
            .filter_map(|s| self.tree.registry().get_by_name(s))
            .map(|layer| layer.name)
            .collect();
        let canonical = join_path(&names);
        debug!(path = %canonical, "context path set");
        *self.path.write() = canonical;
        Ok(())
    }

    /// Context tag keys of the active path
    pub fn context_keys(&self) -> Vec<String> {
        self.tree
            .context_keys(&self.path())
            .unwrap_or_default()
    }

    pub fn insert_document<F: AsRef<str>>(
        &self,
        doc: NewDocument,
        feature_keys: &[F],
    ) -> Result<DocumentId> {
        self.documents.insert(doc, &[self.path()], feature_keys)
    }

    pub fn list_documents<F: AsRef<str>>(
        &self,
        feature_keys: &[F],
        options: &ListOptions,
    ) -> Result<Listing> {
        self.documents.list(&[self.path()], feature_keys, options)
    }

    /// Detach a document from the active path's leaf layer
    pub fn remove_document<F: AsRef<str>>(&self, id: DocumentId, feature_keys: &[F]) -> Result<()> {
        self.documents.remove(id, &[self.path()], feature_keys)
    }
}

#[cfg(test)]
mod tests {
    use crate::canvas::Canvas;
    use crate::error::CanvasError;
    use crate::models::{ListOptions, NewDocument};

    const NONE: &[&str] = &[];

    #[test]
    fn test_set_path_normalizes_and_creates() {
        let canvas = Canvas::in_memory().unwrap();
        let ctx = canvas.context("/").unwrap();
        assert_eq!(ctx.path(), "/");
        assert!(ctx.context_keys().is_empty());

        ctx.set_path("/Work/ Q3 Plans").unwrap();
        assert_eq!(ctx.path(), "/work/q3_plans");
        assert_eq!(ctx.context_keys().len(), 2);
        assert!(canvas.tree().get_node("/work/q3_plans").is_some());

        assert!(matches!(ctx.set_path("/%%%"), Err(CanvasError::InvalidPath(_))));
        assert_eq!(ctx.path(), "/work/q3_plans");
    }

    #[test]
    fn test_documents_follow_active_path() {
        let canvas = Canvas::in_memory().unwrap();
        let ctx = canvas.context("/work/reports").unwrap();
        let a = ctx.insert_document(NewDocument::note("a", ""), &["draft"]).unwrap();

        ctx.set_path("/home").unwrap();
        let b = ctx.insert_document(NewDocument::note("b", ""), NONE).unwrap();
        let listed = ctx.list_documents(NONE, &ListOptions::default()).unwrap();
        assert_eq!(listed.ids(), vec![b]);

        ctx.set_path("/work").unwrap();
        assert_eq!(
            ctx.list_documents(&["draft"], &ListOptions::default())
                .unwrap()
                .ids(),
            vec![a]
        );

        ctx.set_path("/work/reports").unwrap();
        ctx.remove_document(a, &["draft"]).unwrap();
        assert!(ctx
            .list_documents(NONE, &ListOptions::default())
            .unwrap()
            .is_empty());
        assert!(canvas.documents().get(a).unwrap().is_some());
    }
}
