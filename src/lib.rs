//! Context-addressed document store.
//!
//! Documents are tagged into roaring bitmaps keyed by layer; a tree of layer
//! names gives every document one or more paths, and listing a path is an
//! intersection of the bitmaps along it.

pub mod bitset;
pub mod canvas;
pub mod config;
pub mod context;
pub mod documents;
pub mod error;
pub mod kv;
pub mod layers;
pub mod models;
pub mod schema;
pub mod tags;
pub mod tree;

pub use bitset::BitSet;
pub use canvas::Canvas;
pub use config::{CanvasConfig, IdRanges, StorageMode};
pub use context::Context;
pub use documents::{DocumentStore, QueryEngine};
pub use error::{CanvasError, ErrorKind, Result};
pub use layers::{Layer, LayerOptions, LayerPatch, LayerRegistry, LayerType};
pub use models::*;
pub use schema::{ChecksumAlgorithm, SchemaDef, SchemaRegistry};
pub use tags::{IdRange, TagIndex, TagIndexes, TagNamespace};
pub use tree::{PathTree, TreeNode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
