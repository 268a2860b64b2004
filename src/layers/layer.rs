use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CanvasError;
use crate::Result;

/// Id and name of the built-in root layer
pub const ROOT_LAYER_ID: &str = "/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Universe,
    Workspace,
    Canvas,
    Context,
    Filter,
    Label,
}

impl LayerType {
    pub const ALL: [LayerType; 6] = [
        LayerType::Universe,
        LayerType::Workspace,
        LayerType::Canvas,
        LayerType::Context,
        LayerType::Filter,
        LayerType::Label,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Universe => "universe",
            LayerType::Workspace => "workspace",
            LayerType::Canvas => "canvas",
            LayerType::Context => "context",
            LayerType::Filter => "filter",
            LayerType::Label => "label",
        }
    }

    /// Whether new layers of this type get a context bitmap key by default
    pub fn creates_bitmaps(&self) -> bool {
        matches!(
            self,
            LayerType::Workspace | LayerType::Canvas | LayerType::Context
        )
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self> {
        LayerType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CanvasError::InvalidLayerType(s.to_string()))
    }
}

/// A named, typed bundle of tag keys
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub label: String,
    pub description: String,
    pub color: Option<String>,
    pub context_bitmap_key: Option<String>,
    pub feature_bitmap_keys: Vec<String>,
    pub filter_bitmap_keys: Vec<String>,
}

impl Layer {
    pub(crate) fn root() -> Self {
        Self {
            id: ROOT_LAYER_ID.to_string(),
            name: ROOT_LAYER_ID.to_string(),
            layer_type: LayerType::Universe,
            label: "Universe".to_string(),
            description: "Root of the context tree".to_string(),
            color: None,
            context_bitmap_key: None,
            feature_bitmap_keys: Vec::new(),
            filter_bitmap_keys: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_LAYER_ID
    }

    /// Every tag key this layer refers to
    pub fn tag_keys(&self) -> impl Iterator<Item = &str> {
        self.context_bitmap_key
            .iter()
            .chain(self.feature_bitmap_keys.iter())
            .chain(self.filter_bitmap_keys.iter())
            .map(String::as_str)
    }
}

/// Options for creating a layer
#[derive(Clone, Debug)]
pub struct LayerOptions {
    pub layer_type: LayerType,
    pub label: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    /// Defaults to [`LayerType::creates_bitmaps`]
    pub auto_create_bitmaps: Option<bool>,
    pub feature_bitmap_keys: Vec<String>,
    pub filter_bitmap_keys: Vec<String>,
}

impl LayerOptions {
    pub fn new(layer_type: LayerType) -> Self {
        Self {
            layer_type,
            label: None,
            description: None,
            color: None,
            auto_create_bitmaps: None,
            feature_bitmap_keys: Vec::new(),
            filter_bitmap_keys: Vec::new(),
        }
    }

    pub fn context() -> Self {
        Self::new(LayerType::Context)
    }

    /// Parse the type from its string form
    pub fn for_type(layer_type: &str) -> Result<Self> {
        Ok(Self::new(layer_type.parse()?))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_auto_create_bitmaps(mut self, enabled: bool) -> Self {
        self.auto_create_bitmaps = Some(enabled);
        self
    }

    pub fn with_feature_key(mut self, key: impl Into<String>) -> Self {
        self.feature_bitmap_keys.push(key.into());
        self
    }

    pub fn with_filter_key(mut self, key: impl Into<String>) -> Self {
        self.filter_bitmap_keys.push(key.into());
        self
    }

    pub(crate) fn build(self, id: String, name: String, raw_name: &str) -> Layer {
        let auto = self
            .auto_create_bitmaps
            .unwrap_or_else(|| self.layer_type.creates_bitmaps());
        Layer {
            context_bitmap_key: auto.then(|| id.clone()),
            id,
            name,
            layer_type: self.layer_type,
            label: self.label.unwrap_or_else(|| raw_name.trim().to_string()),
            description: self.description.unwrap_or_default(),
            color: self.color,
            feature_bitmap_keys: self.feature_bitmap_keys,
            filter_bitmap_keys: self.filter_bitmap_keys,
        }
    }
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self::context()
    }
}

/// Partial update; `None` fields are left alone. Ids and names are not patchable.
#[derive(Clone, Debug, Default)]
pub struct LayerPatch {
    pub layer_type: Option<LayerType>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub color: Option<Option<String>>,
    pub feature_bitmap_keys: Option<Vec<String>>,
    pub filter_bitmap_keys: Option<Vec<String>>,
}

impl LayerPatch {
    pub fn apply_to(&self, layer: &mut Layer) {
        if let Some(layer_type) = self.layer_type {
            layer.layer_type = layer_type;
        }
        if let Some(ref label) = self.label {
            layer.label = label.clone();
        }
        if let Some(ref description) = self.description {
            layer.description = description.clone();
        }
        if let Some(ref color) = self.color {
            layer.color = color.clone();
        }
        if let Some(ref keys) = self.feature_bitmap_keys {
            layer.feature_bitmap_keys = keys.clone();
        }
        if let Some(ref keys) = self.filter_bitmap_keys {
            layer.filter_bitmap_keys = keys.clone();
        }
    }
}

/// Lowercase, whitespace to `_`, drop anything outside `[a-z0-9_-]`.
pub fn normalize_name(name: &str) -> Result<String> {
    let normalized: String = name
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    if normalized.is_empty() {
        return Err(CanvasError::Validation(format!(
            "layer name '{}' is empty after normalization",
            name
        )));
    }
    Ok(normalized)
}
