use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Unique document identifier; shares the u32 space of the bitmaps
pub type DocumentId = u32;

/// Stored document record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub schema: String,
    pub schema_version: u32,
    pub data: Value,
    /// algorithm -> hex digest
    pub checksums: BTreeMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub version_number: u32,
}

impl Document {
    pub fn checksum(&self, algorithm: &str) -> Option<&str> {
        self.checksums.get(algorithm).map(String::as_str)
    }
}

/// Caller-supplied content for an insert
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub schema: String,
    pub data: Value,
}

impl NewDocument {
    pub fn new(schema: impl Into<String>, data: Value) -> Self {
        Self {
            schema: schema.into(),
            data,
        }
    }

    pub fn note(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            "note",
            serde_json::json!({ "title": title.into(), "content": content.into() }),
        )
    }

    pub fn tab(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(
            "tab",
            serde_json::json!({ "url": url.into(), "title": title.into() }),
        )
    }
}

/// Get current Unix timestamp in seconds
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_json_shape() {
        let doc = Document {
            id: 1_000_001,
            schema: "note".to_string(),
            schema_version: 2,
            data: serde_json::json!({ "title": "t" }),
            checksums: BTreeMap::from([("sha256".to_string(), "abc".to_string())]),
            created_at: 10,
            updated_at: 11,
            version_number: 1,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["versionNumber"], 1);
        assert_eq!(doc.checksum("sha256"), Some("abc"));
        assert_eq!(doc.checksum("crc32"), None);

        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_new_document_helpers() {
        let note = NewDocument::note("title", "body");
        assert_eq!(note.schema, "note");
        assert_eq!(note.data["content"], "body");

        let tab = NewDocument::tab("https://example.com", "Example");
        assert_eq!(tab.data["url"], "https://example.com");
    }
}
