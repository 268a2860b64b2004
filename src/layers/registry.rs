use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::layer::{normalize_name, Layer, LayerOptions, LayerPatch, LayerType, ROOT_LAYER_ID};
use crate::error::CanvasError;
use crate::kv::KvStore;
use crate::tags::{TagIndexes, TagNamespace};
use crate::Result;

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<String, Layer>,
    name_to_id: HashMap<String, String>,
}

impl RegistryState {
    fn insert(&mut self, layer: Layer) {
        self.name_to_id.insert(layer.name.clone(), layer.id.clone());
        self.by_id.insert(layer.id.clone(), layer);
    }

    fn by_name(&self, name: &str) -> Option<&Layer> {
        self.name_to_id.get(name).and_then(|id| self.by_id.get(id))
    }
}

/// Persistent name -> layer mapping.
///
/// Names are unique; ids never change, not even across renames. The root
/// universe layer lives only in memory. Layers placed in the context tree
/// cannot be removed until the tree lets go of them.
pub struct LayerRegistry {
    store: Arc<dyn KvStore>,
    tags: TagIndexes,
    state: RwLock<RegistryState>,
    placed: RwLock<HashSet<String>>,
}

impl LayerRegistry {
    pub fn open(store: Arc<dyn KvStore>, tags: TagIndexes) -> Result<Self> {
        let mut state = RegistryState::default();
        state.insert(Layer::root());

        for key in store.keys()? {
            let Some(bytes) = store.get(&key)? else {
                continue;
            };
            let layer: Layer = bincode::deserialize(&bytes)?;
            if state.name_to_id.contains_key(&layer.name) {
                return Err(CanvasError::Integrity(format!(
                    "duplicate layer name '{}' in storage",
                    layer.name
                )));
            }
            state.insert(layer);
        }
        info!(layers = state.by_id.len() - 1, "layer registry loaded");

        Ok(Self {
            store,
            tags,
            state: RwLock::new(state),
            placed: RwLock::new(HashSet::new()),
        })
    }

    /// Record the layer ids the tree currently references.
    pub(crate) fn set_placed(&self, ids: HashSet<String>) {
        *self.placed.write() = ids;
    }

    /// True while the context tree holds a node for this layer
    pub fn is_placed(&self, id: &str) -> bool {
        self.placed.read().contains(id)
    }

    fn persist(&self, layer: &Layer) -> Result<()> {
        let bytes = bincode::serialize(layer)?;
        self.store.put(layer.id.as_bytes(), &bytes)
    }

    fn mutable_name(name: &str) -> Result<String> {
        if name.trim() == ROOT_LAYER_ID {
            return Err(CanvasError::Validation(
                "the root layer cannot be modified".to_string(),
            ));
        }
        normalize_name(name)
    }

    /// Create a layer. `Ok(None)` when the name is already taken; callers
    /// must check rather than assume creation happened.
    pub fn create(&self, name: &str, options: LayerOptions) -> Result<Option<Layer>> {
        let normalized = Self::mutable_name(name)?;
        if options.layer_type == LayerType::Universe {
            return Err(CanvasError::InvalidLayerType(
                "universe is reserved for the root layer".to_string(),
            ));
        }
        let mut state = self.state.write();
        if state.name_to_id.contains_key(&normalized) {
            debug!(name = %normalized, "layer already exists");
            return Ok(None);
        }
        let layer = options.build(Uuid::new_v4().to_string(), normalized, name);
        self.persist(&layer)?;
        state.insert(layer.clone());
        debug!(name = %layer.name, id = %layer.id, layer_type = %layer.layer_type, "created layer");
        Ok(Some(layer))
    }

    /// Get-or-create
    pub fn ensure(&self, name: &str, options: LayerOptions) -> Result<Layer> {
        if let Some(layer) = self.get_by_name(name) {
            return Ok(layer);
        }
        match self.create(name, options)? {
            Some(layer) => Ok(layer),
            // Lost a race with another creator
            None => self
                .get_by_name(name)
                .ok_or_else(|| CanvasError::LayerNotFound(name.to_string())),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<Layer> {
        let state = self.state.read();
        if name.trim() == ROOT_LAYER_ID {
            return state.by_id.get(ROOT_LAYER_ID).cloned();
        }
        let normalized = normalize_name(name).ok()?;
        state.by_name(&normalized).cloned()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Layer> {
        self.state.read().by_id.get(id).cloned()
    }

    pub fn root(&self) -> Layer {
        self.get_by_id(ROOT_LAYER_ID).unwrap_or_else(Layer::root)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_by_name(name).is_some()
    }

    /// Rename a layer, keeping its id. Tag keys derived from the old name are
    /// renamed alongside.
    pub fn rename(&self, name: &str, new_name: &str) -> Result<Layer> {
        let old = Self::mutable_name(name)?;
        let new = Self::mutable_name(new_name)?;
        let mut state = self.state.write();
        let mut layer = state
            .by_name(&old)
            .cloned()
            .ok_or_else(|| CanvasError::LayerNotFound(name.to_string()))?;
        if old == new {
            return Ok(layer);
        }
        if state.name_to_id.contains_key(&new) {
            return Err(CanvasError::LayerExists(new));
        }

        if layer.context_bitmap_key.as_deref() == Some(old.as_str()) {
            self.rename_tag(TagNamespace::Contexts, &old, &new)?;
            layer.context_bitmap_key = Some(new.clone());
        }
        for key in layer.feature_bitmap_keys.iter_mut().filter(|k| **k == old) {
            self.rename_tag(TagNamespace::Features, &old, &new)?;
            *key = new.clone();
        }
        for key in layer.filter_bitmap_keys.iter_mut().filter(|k| **k == old) {
            self.rename_tag(TagNamespace::Filters, &old, &new)?;
            *key = new.clone();
        }

        layer.name = new.clone();
        self.persist(&layer)?;
        state.name_to_id.remove(&old);
        state.insert(layer.clone());
        debug!(from = %old, to = %new, id = %layer.id, "renamed layer");
        Ok(layer)
    }

    fn rename_tag(&self, namespace: TagNamespace, old: &str, new: &str) -> Result<()> {
        let index = self.tags.get(namespace);
        if index.exists(old)? {
            index.rename(old, new)?;
        }
        Ok(())
    }

    /// Merge a patch into a layer
    pub fn update(&self, name: &str, patch: &LayerPatch) -> Result<Layer> {
        let normalized = Self::mutable_name(name)?;
        if patch.layer_type == Some(LayerType::Universe) {
            return Err(CanvasError::InvalidLayerType(
                "universe is reserved for the root layer".to_string(),
            ));
        }
        let mut state = self.state.write();
        let mut layer = state
            .by_name(&normalized)
            .cloned()
            .ok_or_else(|| CanvasError::LayerNotFound(name.to_string()))?;
        patch.apply_to(&mut layer);
        self.persist(&layer)?;
        state.insert(layer.clone());
        Ok(layer)
    }

    /// Drop the registry entry only; the layer's bitmaps are kept.
    ///
    /// A layer still placed in the context tree is a `Conflict`: detach it
    /// from the tree first.
    pub fn remove(&self, name: &str) -> Result<Layer> {
        let normalized = Self::mutable_name(name)?;
        let mut state = self.state.write();
        let id = state
            .name_to_id
            .get(&normalized)
            .cloned()
            .ok_or_else(|| CanvasError::LayerNotFound(name.to_string()))?;
        if self.is_placed(&id) {
            return Err(CanvasError::Conflict(format!(
                "layer '{}' is still placed in the context tree",
                normalized
            )));
        }
        self.store.delete(id.as_bytes())?;
        state.name_to_id.remove(&normalized);
        let layer = state
            .by_id
            .remove(&id)
            .ok_or_else(|| CanvasError::LayerNotFound(name.to_string()))?;
        debug!(name = %normalized, id = %id, "removed layer");
        Ok(layer)
    }

    /// Remove the entry and delete the context and filter bitmaps it owns.
    /// Feature keys are shared vocabulary and survive.
    pub fn destroy(&self, name: &str) -> Result<Layer> {
        let layer = self.remove(name)?;
        if let Some(ref key) = layer.context_bitmap_key {
            self.tags.contexts.remove(key)?;
        }
        for key in &layer.filter_bitmap_keys {
            self.tags.filters.remove(key)?;
        }
        debug!(name = %layer.name, "destroyed layer bitmaps");
        Ok(layer)
    }

    /// All persisted layers, sorted by name. The root is not included.
    pub fn list(&self) -> Vec<Layer> {
        let state = self.state.read();
        let mut layers: Vec<Layer> = state
            .by_id
            .values()
            .filter(|l| !l.is_root())
            .cloned()
            .collect();
        layers.sort_by(|a, b| a.name.cmp(&b.name));
        layers
    }

    pub fn list_by_type(&self, layer_type: LayerType) -> Vec<Layer> {
        self.list()
            .into_iter()
            .filter(|l| l.layer_type == layer_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
