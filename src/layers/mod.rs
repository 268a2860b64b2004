//! Layers and the registry that names them.

mod layer;
mod registry;

pub use layer::{normalize_name, Layer, LayerOptions, LayerPatch, LayerType, ROOT_LAYER_ID};
pub use registry::LayerRegistry;
