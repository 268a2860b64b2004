//! Explicit wiring of the whole store from a [`CanvasConfig`].

use std::sync::Arc;

use tracing::info;

use crate::config::{CanvasConfig, StorageMode};
use crate::context::Context;
use crate::documents::DocumentStore;
use crate::error::CanvasError;
use crate::kv::{FjallBackend, KvBackend, MemoryBackend, LAYERS_KS, TREE_KS};
use crate::layers::{Layer, LayerOptions, LayerRegistry};
use crate::schema::SchemaRegistry;
use crate::tags::{TagIndex, TagIndexes};
use crate::tree::PathTree;
use crate::Result;

/// Every component, built once and shared by handle.
pub struct Canvas {
    config: CanvasConfig,
    backend: Arc<dyn KvBackend>,
    tags: TagIndexes,
    registry: Arc<LayerRegistry>,
    tree: Arc<PathTree>,
    documents: Arc<DocumentStore>,
}

impl Canvas {
    pub fn open(config: CanvasConfig) -> Result<Self> {
        let backend: Arc<dyn KvBackend> = match config.storage {
            StorageMode::Persistent => Arc::new(FjallBackend::open(config.db_dir())?),
            StorageMode::InMemory => Arc::new(MemoryBackend::new()),
        };
        Self::with_backend(config, backend)
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(CanvasConfig::in_memory())
    }

    /// Build on a caller-supplied backend
    pub fn with_backend(config: CanvasConfig, backend: Arc<dyn KvBackend>) -> Result<Self> {
        let tags = TagIndexes::open(backend.as_ref(), &config.ranges)?;
        let registry = Arc::new(LayerRegistry::open(
            backend.keyspace(LAYERS_KS)?,
            tags.clone(),
        )?);
        let tree = Arc::new(PathTree::open(
            backend.keyspace(TREE_KS)?,
            registry.clone(),
            config.auto_create_layers,
        )?);
        let documents = Arc::new(DocumentStore::open(
            backend.as_ref(),
            tree.clone(),
            tags.clone(),
            Arc::new(SchemaRegistry::new()),
            &config,
        )?);
        info!(
            storage = ?config.storage,
            data_dir = %config.data_dir.display(),
            layers = registry.len(),
            "canvas opened"
        );
        Ok(Self {
            config,
            backend,
            tags,
            registry,
            tree,
            documents,
        })
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn tags(&self) -> &TagIndexes {
        &self.tags
    }

    /// System tags over the reserved low id range
    pub fn internal_tags(&self) -> &Arc<TagIndex> {
        &self.tags.internal
    }

    pub fn layers(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn tree(&self) -> &Arc<PathTree> {
        &self.tree
    }

    pub fn documents(&self) -> &Arc<DocumentStore> {
        &self.documents
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        self.documents.schemas()
    }

    /// A context positioned at `path`
    pub fn context(&self, path: &str) -> Result<Context> {
        Context::open(self.tree.clone(), self.documents.clone(), path)
    }

    pub fn create_layer(&self, name: &str, options: LayerOptions) -> Result<Option<Layer>> {
        self.registry.create(name, options)
    }

    /// Take a layer out of the tree and the registry. Its bitmaps stay.
    pub fn remove_layer(&self, name: &str) -> Result<Layer> {
        let layer = self.lookup(name)?;
        self.tree.detach_layer(&layer.id)?;
        self.registry.remove(name)
    }

    /// Like [`Canvas::remove_layer`], and also drop the bitmaps the layer owns.
    pub fn destroy_layer(&self, name: &str) -> Result<Layer> {
        let layer = self.lookup(name)?;
        self.tree.detach_layer(&layer.id)?;
        self.registry.destroy(name)
    }

    fn lookup(&self, name: &str) -> Result<Layer> {
        let layer = self
            .registry
            .get_by_name(name)
            .ok_or_else(|| CanvasError::LayerNotFound(name.to_string()))?;
        if layer.is_root() {
            return Err(CanvasError::Validation(
                "the root layer cannot be removed".to_string(),
            ));
        }
        Ok(layer)
    }

    /// Flush to durable storage
    pub fn persist(&self) -> Result<()> {
        self.backend.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerType;
    use crate::models::NewDocument;

    const NONE: &[&str] = &[];

    #[test]
    fn test_work_scenario() {
        let canvas = Canvas::in_memory().unwrap();
        canvas
            .create_layer("work", LayerOptions::new(LayerType::Context))
            .unwrap()
            .unwrap();
        canvas.tree().insert("/work").unwrap();

        let x = canvas
            .documents()
            .insert(
                NewDocument::new("note", serde_json::json!({ "title": "t" })),
                &["work"],
                NONE,
            )
            .unwrap();
        assert_eq!(canvas.documents().list_ids(&["work"], NONE).unwrap(), vec![x]);
        assert!(canvas.documents().list_ids(&["other"], NONE).unwrap().is_empty());
    }

    #[test]
    fn test_remove_layer_prunes_tree_keeps_bitmaps() {
        let canvas = Canvas::in_memory().unwrap();
        let id = canvas
            .documents()
            .insert(NewDocument::note("t", ""), &["/a/b"], NONE)
            .unwrap();
        let b = canvas.layers().get_by_name("b").unwrap();

        canvas.remove_layer("b").unwrap();
        assert!(canvas.tree().get_node("/a/b").is_none());
        assert!(canvas.layers().get_by_name("b").is_none());
        assert!(canvas.tags().contexts.has(&b.id, id).unwrap());

        let a = canvas.destroy_layer("a").unwrap();
        assert!(!canvas.tags().contexts.exists(&a.id).unwrap());
        assert!(canvas.tree().list_paths().is_empty());

        assert!(matches!(canvas.remove_layer("/"), Err(CanvasError::Validation(_))));
        assert!(matches!(
            canvas.remove_layer("ghost"),
            Err(CanvasError::LayerNotFound(_))
        ));
    }

    #[test]
    fn test_internal_tags_use_low_range() {
        let canvas = Canvas::in_memory().unwrap();
        canvas.internal_tags().tick("system", &[1_000, 999_999]).unwrap();
        assert!(matches!(
            canvas.internal_tags().tick("system", &[1_000_001]),
            Err(CanvasError::IdOutOfRange { .. })
        ));
        assert!(matches!(
            canvas.tags().features.tick("feature", &[999]),
            Err(CanvasError::IdOutOfRange { .. })
        ));
    }

    #[test]
    fn test_persistent_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let id = {
            let canvas = Canvas::open(CanvasConfig::new(tmp.path())).unwrap();
            let id = canvas
                .documents()
                .insert(NewDocument::note("kept", ""), &["/work"], &["urgent"])
                .unwrap();
            canvas.persist().unwrap();
            id
        };
        let canvas = Canvas::open(CanvasConfig::new(tmp.path())).unwrap();
        assert_eq!(canvas.documents().list_ids(&["/work"], &["urgent"]).unwrap(), vec![id]);
        assert_eq!(canvas.tree().list_paths(), vec!["/work".to_string()]);
    }

    #[test]
    fn test_placed_layer_survives_direct_remove_across_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let canvas = Canvas::open(CanvasConfig::new(tmp.path())).unwrap();
            canvas.tree().insert("/a/b").unwrap();
            assert!(matches!(canvas.layers().remove("b"), Err(CanvasError::Conflict(_))));
            canvas.persist().unwrap();
        }
        {
            let canvas = Canvas::open(CanvasConfig::new(tmp.path())).unwrap();
            assert_eq!(canvas.tree().list_paths(), vec!["/a/b".to_string()]);
            canvas.remove_layer("b").unwrap();
            canvas.persist().unwrap();
        }
        let canvas = Canvas::open(CanvasConfig::new(tmp.path())).unwrap();
        assert_eq!(canvas.tree().list_paths(), vec!["/a".to_string()]);
        assert!(!canvas.layers().contains("b"));
    }
}
