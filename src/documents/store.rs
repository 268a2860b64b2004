use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::query::QueryEngine;
use crate::bitset::BitSet;
use crate::config::CanvasConfig;
use crate::error::CanvasError;
use crate::kv::{KvBackend, KvStore, CHECKSUMS_KS, DOCUMENTS_KS, DOCUMENT_VERSIONS_KS, META_KS};
use crate::models::{current_timestamp, Document, DocumentId, ListOptions, Listing, NewDocument};
use crate::schema::{compute_checksums, ChecksumAlgorithm, SchemaRegistry};
use crate::tags::{IdRange, TagIndexes};
use crate::tree::PathTree;
use crate::Result;

const NEXT_ID_KEY: &[u8] = b"next_document_id";

fn encode_id(id: DocumentId) -> [u8; 4] {
    id.to_be_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<DocumentId> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| {
        CanvasError::Integrity(format!("document id must be 4 bytes, got {}", bytes.len()))
    })?;
    Ok(DocumentId::from_be_bytes(arr))
}

fn version_key(id: DocumentId, version: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&id.to_be_bytes());
    key[4..].copy_from_slice(&version.to_be_bytes());
    key
}

fn checksum_key(algorithm: &str, digest: &str) -> Vec<u8> {
    format!("{}/{}", algorithm, digest).into_bytes()
}

/// Content-addressed document storage with bitmap-backed listing.
///
/// Insert order is body, then bitmaps, then the checksum mapping. The primary
/// checksum mapping is the commit marker: a body without it is visible through
/// [`DocumentStore::uncommitted`] and can be fixed with [`DocumentStore::repair`].
pub struct DocumentStore {
    documents: Arc<dyn KvStore>,
    versions: Arc<dyn KvStore>,
    checksums: Arc<dyn KvStore>,
    meta: Arc<dyn KvStore>,
    tags: TagIndexes,
    tree: Arc<PathTree>,
    schemas: Arc<SchemaRegistry>,
    query: QueryEngine,
    primary: ChecksumAlgorithm,
    algorithms: Vec<ChecksumAlgorithm>,
    id_range: IdRange,
    /// Next id to hand out; holding the lock serializes inserts
    next_id: Mutex<DocumentId>,
}

impl DocumentStore {
    pub fn open(
        backend: &dyn KvBackend,
        tree: Arc<PathTree>,
        tags: TagIndexes,
        schemas: Arc<SchemaRegistry>,
        config: &CanvasConfig,
    ) -> Result<Self> {
        let documents = backend.keyspace(DOCUMENTS_KS)?;
        let versions = backend.keyspace(DOCUMENT_VERSIONS_KS)?;
        let checksums = backend.keyspace(CHECKSUMS_KS)?;
        let meta = backend.keyspace(META_KS)?;

        let mut algorithms = vec![config.primary_checksum];
        for algo in &config.checksum_algorithms {
            if !algorithms.contains(algo) {
                algorithms.push(*algo);
            }
        }

        let first = config.ranges.first_document_id();
        let next_id = match meta.get(NEXT_ID_KEY)? {
            Some(bytes) => decode_id(&bytes)?,
            None => {
                // No counter yet: continue after whatever bodies exist.
                let highest = documents
                    .keys()?
                    .last()
                    .map(|k| decode_id(k))
                    .transpose()?;
                highest.map_or(first, |id| id.saturating_add(1).max(first))
            }
        };
        info!(
            documents = documents.len()?,
            next_id,
            primary = %config.primary_checksum,
            "document store opened"
        );

        let query = QueryEngine::new(tree.clone(), tags.clone());
        Ok(Self {
            documents,
            versions,
            checksums,
            meta,
            tags,
            tree,
            schemas,
            query,
            primary: config.primary_checksum,
            algorithms,
            id_range: config.ranges.contexts,
            next_id: Mutex::new(next_id),
        })
    }

    pub fn primary_checksum(&self) -> ChecksumAlgorithm {
        self.primary
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    fn put_body(&self, doc: &Document) -> Result<()> {
        let bytes = serde_json::to_vec(doc)?;
        self.documents.put(&encode_id(doc.id), &bytes)
    }

    fn lookup_checksum(&self, algorithm: &str, digest: &str) -> Result<Option<DocumentId>> {
        self.checksums
            .get(&checksum_key(algorithm, digest))?
            .map(|bytes| decode_id(&bytes))
            .transpose()
    }

    /// Write the checksum mappings, primary last.
    fn commit_checksums(&self, doc: &Document) -> Result<()> {
        let primary = self.primary.as_str();
        for (algo, digest) in doc.checksums.iter().filter(|(a, _)| a.as_str() != primary) {
            self.checksums
                .put(&checksum_key(algo, digest), &encode_id(doc.id))?;
        }
        if let Some(digest) = doc.checksum(primary) {
            self.checksums
                .put(&checksum_key(primary, digest), &encode_id(doc.id))?;
        }
        Ok(())
    }

    fn allocate_id(&self, next: &mut DocumentId) -> Result<DocumentId> {
        let id = *next;
        if !self.id_range.contains(id) {
            return Err(CanvasError::Integrity(format!(
                "document id {} outside [{}, {})",
                id, self.id_range.min, self.id_range.max
            )));
        }
        let following = id + 1;
        self.meta.put(NEXT_ID_KEY, &encode_id(following))?;
        *next = following;
        Ok(id)
    }

    /// Insert or update a document and tag it.
    ///
    /// Content whose primary checksum is already stored updates that document:
    /// same id, bumped `version_number`, prior body kept in the version
    /// history; a digest held by a document of another schema never matches.
    /// Context paths are placed in the tree first, under the configured
    /// auto-create policy, so a rejected path leaves nothing behind. The
    /// schema name is always ticked as a feature.
    pub fn insert<S: AsRef<str>, F: AsRef<str>>(
        &self,
        doc: NewDocument,
        context_paths: &[S],
        feature_keys: &[F],
    ) -> Result<DocumentId> {
        let schema = self.schemas.resolve(&doc.schema)?;
        schema.validate(&doc.data)?;
        let checksums = compute_checksums(&self.algorithms, &schema.checksum_input(&doc.data)?);
        let primary_digest = checksums
            .get(self.primary.as_str())
            .cloned()
            .ok_or_else(|| CanvasError::Integrity("primary checksum not computed".into()))?;

        let mut context_keys: Vec<String> = Vec::new();
        for path in context_paths {
            self.tree.insert(path.as_ref())?;
            for key in self.tree.context_keys(path.as_ref()).unwrap_or_default() {
                if !context_keys.contains(&key) {
                    context_keys.push(key);
                }
            }
        }

        let mut next = self.next_id.lock();
        let existing = match self.lookup_checksum(self.primary.as_str(), &primary_digest)? {
            Some(id) => self.get(id)?.filter(|prev| prev.schema == schema.name),
            None => None,
        };

        let now = current_timestamp();
        let record = match existing {
            Some(prev) => {
                let bytes = serde_json::to_vec(&prev)?;
                self.versions
                    .put(&version_key(prev.id, prev.version_number), &bytes)?;
                Document {
                    id: prev.id,
                    schema: schema.name.clone(),
                    schema_version: schema.version,
                    data: doc.data,
                    checksums,
                    created_at: prev.created_at,
                    updated_at: now,
                    version_number: prev.version_number + 1,
                }
            }
            None => Document {
                id: self.allocate_id(&mut next)?,
                schema: schema.name.clone(),
                schema_version: schema.version,
                data: doc.data,
                checksums,
                created_at: now,
                updated_at: now,
                version_number: 1,
            },
        };
        let id = record.id;
        self.put_body(&record)?;
        self.tags.contexts.tick_many(&context_keys, &[id])?;

        let mut features: Vec<String> = feature_keys
            .iter()
            .map(|k| k.as_ref().to_string())
            .collect();
        if !features.contains(&record.schema) {
            features.push(record.schema.clone());
        }
        self.tags.features.tick_many(&features, &[id])?;

        self.commit_checksums(&record)?;
        debug!(
            id,
            schema = %record.schema,
            version = record.version_number,
            contexts = context_keys.len(),
            features = features.len(),
            "inserted document"
        );
        Ok(id)
    }

    /// Detach a document from contexts and features without deleting it.
    ///
    /// Only the context key of each path's last segment is unticked; a path
    /// that does not resolve is skipped.
    pub fn remove<S: AsRef<str>, F: AsRef<str>>(
        &self,
        id: DocumentId,
        context_paths: &[S],
        feature_keys: &[F],
    ) -> Result<()> {
        if !self.documents.contains(&encode_id(id))? {
            return Err(CanvasError::DocumentNotFound(id));
        }
        for path in context_paths {
            let key = self
                .tree
                .layer_at(path.as_ref())
                .and_then(|layer| layer.context_bitmap_key);
            match key {
                Some(key) => {
                    self.tags.contexts.untick(&key, &[id])?;
                }
                None => debug!(path = path.as_ref(), "no context key to untick"),
            }
        }
        self.tags.features.untick_many(feature_keys, &[id])?;
        debug!(id, "detached document");
        Ok(())
    }

    /// Delete a document everywhere: checksum mappings, bitmaps, history, body.
    pub fn delete(&self, id: DocumentId) -> Result<Document> {
        let _guard = self.next_id.lock();
        let doc = self.get(id)?.ok_or(CanvasError::DocumentNotFound(id))?;

        for (algo, digest) in &doc.checksums {
            if self.lookup_checksum(algo, digest)? == Some(id) {
                self.checksums.delete(&checksum_key(algo, digest))?;
            }
        }
        let touched = self.tags.untick_everywhere(id)?;
        for (key, _) in self.versions.scan_prefix(&encode_id(id))? {
            self.versions.delete(&key)?;
        }
        self.documents.delete(&encode_id(id))?;
        debug!(id, bitmaps = touched.len(), "deleted document");
        Ok(doc)
    }

    pub fn get(&self, id: DocumentId) -> Result<Option<Document>> {
        match self.documents.get(&encode_id(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Documents for `ids`, in order; ids without a body are skipped.
    pub fn get_many<I: IntoIterator<Item = DocumentId>>(&self, ids: I) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for id in ids {
            match self.get(id)? {
                Some(doc) => out.push(doc),
                None => warn!(id, "bitmap references a document without a body"),
            }
        }
        Ok(out)
    }

    pub fn get_by_checksum(
        &self,
        algorithm: ChecksumAlgorithm,
        digest: &str,
    ) -> Result<Option<Document>> {
        match self.lookup_checksum(algorithm.as_str(), digest)? {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    /// Prior versions of a document, oldest first. The current body is not included.
    pub fn versions(&self, id: DocumentId) -> Result<Vec<Document>> {
        self.versions
            .scan_prefix(&encode_id(id))?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(CanvasError::from))
            .collect()
    }

    pub fn count(&self) -> Result<usize> {
        self.documents.len()
    }

    /// Every stored document id
    pub fn all_ids(&self) -> Result<BitSet> {
        self.documents
            .keys()?
            .iter()
            .map(|k| decode_id(k))
            .collect()
    }

    /// Documents matching the context paths and feature keys.
    ///
    /// Contexts are ANDed, features are ORed, and the two sides intersect.
    /// With no paths and no features every document is returned.
    pub fn list<S: AsRef<str>, F: AsRef<str>>(
        &self,
        context_paths: &[S],
        feature_keys: &[F],
        options: &ListOptions,
    ) -> Result<Listing> {
        let ids = match self.query.matching(context_paths, feature_keys)? {
            Some(ids) => ids,
            None => self.all_ids()?,
        };
        let limit = options.limit.unwrap_or(usize::MAX);
        let ids: Vec<DocumentId> = ids.iter().take(limit).collect();
        if options.return_metadata {
            Ok(Listing::Documents(self.get_many(ids)?))
        } else {
            Ok(Listing::Ids(ids))
        }
    }

    pub fn list_ids<S: AsRef<str>, F: AsRef<str>>(
        &self,
        context_paths: &[S],
        feature_keys: &[F],
    ) -> Result<Vec<DocumentId>> {
        Ok(self
            .list(context_paths, feature_keys, &ListOptions::default())?
            .ids())
    }

    /// Bodies whose primary checksum mapping is missing or points elsewhere
    pub fn uncommitted(&self) -> Result<Vec<DocumentId>> {
        let primary = self.primary.as_str();
        let mut out = Vec::new();
        for (key, bytes) in self.documents.scan_prefix(&[])? {
            let id = decode_id(&key)?;
            let doc: Document = serde_json::from_slice(&bytes)?;
            let committed = match doc.checksum(primary) {
                Some(digest) => self.lookup_checksum(primary, digest)? == Some(id),
                None => false,
            };
            if !committed {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Finish a partially applied insert: re-tick the schema feature and
    /// rewrite the checksum mappings.
    pub fn repair(&self, id: DocumentId) -> Result<()> {
        let _guard = self.next_id.lock();
        let doc = self.get(id)?.ok_or(CanvasError::DocumentNotFound(id))?;
        if let Some(digest) = doc.checksum(self.primary.as_str()) {
            if let Some(owner) = self.lookup_checksum(self.primary.as_str(), digest)? {
                if owner != id && self.documents.contains(&encode_id(owner))? {
                    return Err(CanvasError::Conflict(format!(
                        "checksum of document {} already belongs to {}",
                        id, owner
                    )));
                }
            }
        }
        self.tags.features.tick(&doc.schema, &[id])?;
        self.commit_checksums(&doc)?;
        info!(id, "repaired document");
        Ok(())
    }
}
