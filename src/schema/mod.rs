//! Document schemas: required fields and checksum-relevant fields per schema.

mod checksum;

pub use checksum::{compute_checksums, ChecksumAlgorithm};

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CanvasError;
use crate::Result;

/// Shape contract for one schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    pub version: u32,
    /// Fields that must be present and non-empty
    pub required: Vec<String>,
    /// Fields the dedup checksum is computed over
    pub checksum_fields: Vec<String>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            required: Vec::new(),
            checksum_fields: Vec::new(),
        }
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    pub fn checksum_over(mut self, field: impl Into<String>) -> Self {
        self.checksum_fields.push(field.into());
        self
    }

    pub fn note() -> Self {
        Self::new("note", 2)
            .require("title")
            .checksum_over("title")
            .checksum_over("content")
    }

    pub fn tab() -> Self {
        Self::new("tab", 2).require("url").checksum_over("url")
    }

    pub fn file() -> Self {
        Self::new("file", 1)
            .require("path")
            .checksum_over("path")
            .checksum_over("size")
    }

    /// Check required fields against a payload
    pub fn validate(&self, data: &Value) -> Result<()> {
        let obj = data.as_object().ok_or_else(|| {
            CanvasError::Validation(format!("{} data must be a JSON object", self.name))
        })?;
        for field in &self.required {
            match obj.get(field) {
                None | Some(Value::Null) => {
                    return Err(CanvasError::Validation(format!(
                        "{} is missing required field '{}'",
                        self.name, field
                    )))
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(CanvasError::Validation(format!(
                        "{} field '{}' must not be empty",
                        self.name, field
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Canonical bytes the checksum is computed over.
    ///
    /// The schema name is part of the input, so equal fields under two
    /// schemas never share a digest. Absent fields are encoded as null so
    /// that `{title}` and `{title, content: null}` hash the same. With no
    /// checksum fields configured the whole payload is used.
    pub fn checksum_input(&self, data: &Value) -> Result<Vec<u8>> {
        let fields = if self.checksum_fields.is_empty() {
            data.clone()
        } else {
            let mut subset = Map::new();
            for field in &self.checksum_fields {
                let value = data.get(field).cloned().unwrap_or(Value::Null);
                subset.insert(field.clone(), value);
            }
            Value::Object(subset)
        };
        let mut canonical = Map::new();
        canonical.insert("schema".to_string(), Value::String(self.name.clone()));
        canonical.insert("fields".to_string(), fields);
        Ok(serde_json::to_vec(&Value::Object(canonical))?)
    }
}

/// Known schemas, keyed by name.
pub struct SchemaRegistry {
    schemas: RwLock<BTreeMap<String, SchemaDef>>,
}

impl SchemaRegistry {
    /// Registry preloaded with `note`, `tab` and `file`
    pub fn new() -> Self {
        let registry = Self::empty();
        for def in [SchemaDef::note(), SchemaDef::tab(), SchemaDef::file()] {
            registry.register(def);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            schemas: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add or replace a schema
    pub fn register(&self, def: SchemaDef) {
        self.schemas.write().insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<SchemaDef> {
        self.schemas.read().get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<SchemaDef> {
        self.get(name)
            .ok_or_else(|| CanvasError::Validation(format!("unknown schema '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
