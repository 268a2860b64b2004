use serde::{Deserialize, Serialize};

use super::document::{Document, DocumentId};

/// Options for listing documents
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListOptions {
    pub limit: Option<usize>,
    /// Return full documents instead of ids
    pub return_metadata: bool,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_documents(mut self) -> Self {
        self.return_metadata = true;
        self
    }
}

/// Result of a list query, shaped by [`ListOptions::return_metadata`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listing {
    Ids(Vec<DocumentId>),
    Documents(Vec<Document>),
}

impl Listing {
    pub fn len(&self) -> usize {
        match self {
            Listing::Ids(ids) => ids.len(),
            Listing::Documents(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<DocumentId> {
        match self {
            Listing::Ids(ids) => ids.clone(),
            Listing::Documents(docs) => docs.iter().map(|d| d.id).collect(),
        }
    }
}
