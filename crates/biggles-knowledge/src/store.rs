use crate::document::{
    AttributeValue, Attributes, Document, DocumentFilter, DocumentId, DocumentKind, NewDocument,
};
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::snapshot::{KnowledgeSnapshot, SNAPSHOT_VERSION};
use biggles_core::{BigglesError, BigglesResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which ranking path serves [`KnowledgeStore::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Term/substring overlap. Used when no embedding provider is configured.
    Keyword,
    /// Cosine similarity over embeddings.
    Vector,
}

/// A document with its relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matching document.
    pub document: Document,
    /// Term overlap in keyword mode, cosine similarity in vector mode. Higher is better.
    pub score: f32,
}

/// Ranked hits plus the mode that actually produced them.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// `Keyword` when a vector search fell back, even if an embedder is configured.
    pub mode: SearchMode,
    /// Best first.
    pub results: Vec<SearchResult>,
}

impl SearchOutcome {
    /// Result ids in rank order.
    pub fn ids(&self) -> Vec<DocumentId> {
        self.results.iter().map(|r| r.document.id).collect()
    }
}

/// Aggregate counts for dashboards and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Documents in the store.
    pub total_documents: usize,
    /// Kinds with no documents are omitted.
    pub by_kind: BTreeMap<DocumentKind, usize>,
    /// Documents per contributor id.
    pub by_contributor: BTreeMap<String, usize>,
    /// Distinct tags across all documents.
    pub total_tags: usize,
    /// Configured mode; see [`SearchOutcome::mode`] for the one a search used.
    pub search_mode: SearchMode,
}

/// Canonical document list plus the three secondary indices.
///
/// Indices hold positions into `documents`, so iterating an index set in
/// order yields insertion order.
#[derive(Default)]
struct StoreInner {
    documents: Vec<Document>,
    positions: HashMap<DocumentId, usize>,
    by_contributor: HashMap<String, BTreeSet<usize>>,
    by_kind: HashMap<DocumentKind, BTreeSet<usize>>,
    by_tag: HashMap<String, BTreeSet<usize>>,
}

impl StoreInner {
    /// Rebuild from documents in order, rejecting duplicates and forward or dangling parents.
    fn from_documents(documents: Vec<Document>) -> BigglesResult<Self> {
        let mut inner = StoreInner::default();
        for doc in documents {
            if inner.positions.contains_key(&doc.id) {
                return Err(BigglesError::Validation(format!(
                    "duplicate document id {}",
                    doc.id
                )));
            }
            if let Some(parent) = doc.parent_id {
                if !inner.positions.contains_key(&parent) {
                    return Err(BigglesError::Validation(format!(
                        "document {} references unknown or later parent {parent}",
                        doc.id
                    )));
                }
            }
            check_attributes(&doc.attributes)?;
            inner.insert(doc);
        }
        Ok(inner)
    }

    /// Infallible once the caller has validated the document.
    fn insert(&mut self, doc: Document) {
        let pos = self.documents.len();
        self.by_contributor
            .entry(doc.contributor.clone())
            .or_default()
            .insert(pos);
        self.by_kind.entry(doc.kind).or_default().insert(pos);
        for tag in &doc.tags {
            self.by_tag.entry(tag.clone()).or_default().insert(pos);
        }
        self.positions.insert(doc.id, pos);
        self.documents.push(doc);
    }

    /// Everything `add` rejects, checked before any index is touched.
    fn validate(&self, new: &NewDocument) -> BigglesResult<()> {
        if new.contributor.trim().is_empty() {
            return Err(BigglesError::Validation(
                "document contributor must not be empty".to_string(),
            ));
        }
        check_attributes(&new.attributes)?;
        if let Some(parent) = new.parent_id {
            if !self.positions.contains_key(&parent) {
                return Err(BigglesError::Reference(format!(
                    "parent document {parent} does not exist"
                )));
            }
        }
        Ok(())
    }

    /// Assign an id and timestamp, then index. The document must be validated.
    fn admit(&mut self, new: NewDocument) -> DocumentId {
        let id = self.fresh_id();
        self.insert(Document {
            id,
            content: new.content,
            kind: new.kind,
            contributor: new.contributor,
            created_at: Utc::now(),
            tags: new.tags,
            attributes: new.attributes,
            embedding: None,
            parent_id: new.parent_id,
        });
        id
    }

    fn fresh_id(&self) -> DocumentId {
        loop {
            let id = Uuid::new_v4();
            if !self.positions.contains_key(&id) {
                return id;
            }
        }
    }

    fn select(&self, filter: &DocumentFilter) -> Vec<usize> {
        let mut sets: Vec<&BTreeSet<usize>> = Vec::with_capacity(3);
        if let Some(contributor) = &filter.contributor {
            match self.by_contributor.get(contributor) {
                Some(set) => sets.push(set),
                None => return Vec::new(),
            }
        }
        if let Some(kind) = &filter.kind {
            match self.by_kind.get(kind) {
                Some(set) => sets.push(set),
                None => return Vec::new(),
            }
        }
        if let Some(tag) = &filter.tag {
            match self.by_tag.get(tag) {
                Some(set) => sets.push(set),
                None => return Vec::new(),
            }
        }

        sets.sort_by_key(|s| s.len());
        match sets.split_first() {
            None => (0..self.documents.len()).collect(),
            Some((smallest, rest)) => smallest
                .iter()
                .copied()
                .filter(|pos| rest.iter().all(|set| set.contains(pos)))
                .collect(),
        }
    }
}

/// Concurrent, append-mostly repository of worker documents.
///
/// Every mutation runs inside one write section of an async `RwLock`, so
/// concurrent workers can add documents without ever exposing an index that
/// disagrees with the canonical list.
pub struct KnowledgeStore {
    inner: RwLock<StoreInner>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// Serializes lazy embedding passes so no document is embedded twice.
    embed_lock: Mutex<()>,
    persist_path: Option<PathBuf>,
    /// Serializes snapshot writes so the newest state always lands last.
    persist_lock: Mutex<()>,
}

impl KnowledgeStore {
    /// An empty in-memory store in keyword search mode.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            embedder: None,
            embed_lock: Mutex::new(()),
            persist_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open a store that auto-saves to `path`, loading it first if it exists.
    pub async fn open(path: impl Into<PathBuf>) -> BigglesResult<Self> {
        let path = path.into();
        let mut store = Self::new();
        if tokio::fs::try_exists(&path).await? {
            let snapshot = KnowledgeSnapshot::read_from(&path).await?;
            check_version(&snapshot)?;
            let count = snapshot.documents.len();
            store.inner = RwLock::new(StoreInner::from_documents(snapshot.documents)?);
            info!(path = %path.display(), documents = count, "Knowledge store loaded");
        }
        store.persist_path = Some(path);
        Ok(store)
    }

    /// Switch search into vector mode using the given provider.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// The active search capability.
    pub fn search_mode(&self) -> SearchMode {
        if self.embedder.is_some() {
            SearchMode::Vector
        } else {
            SearchMode::Keyword
        }
    }

    /// Where autosave writes, if anywhere.
    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Add a document. All indices update together or not at all.
    ///
    /// Rejects an empty contributor, a dangling parent, and float attributes
    /// that are NaN or infinite (they cannot be written to a snapshot).
    pub async fn add(&self, new: NewDocument) -> BigglesResult<DocumentId> {
        let kind = new.kind;
        let contributor = new.contributor.clone();
        let id = {
            let mut inner = self.inner.write().await;
            inner.validate(&new)?;
            inner.admit(new)
        };

        debug!(id = %id, kind = %kind, contributor = %contributor, "Document added");
        self.autosave().await;
        Ok(id)
    }

    /// Add several documents under one write lock, all or nothing.
    ///
    /// Every document is validated as in [`add`](Self::add) before the first
    /// one is inserted. Ids come back in input order and the store autosaves once.
    pub async fn add_all(&self, batch: Vec<NewDocument>) -> BigglesResult<Vec<DocumentId>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let ids = {
            let mut inner = self.inner.write().await;
            for (index, new) in batch.iter().enumerate() {
                inner.validate(new).map_err(|e| match e {
                    BigglesError::Validation(msg) => {
                        BigglesError::Validation(format!("document {index}: {msg}"))
                    }
                    BigglesError::Reference(msg) => {
                        BigglesError::Reference(format!("document {index}: {msg}"))
                    }
                    other => other,
                })?;
            }
            batch
                .into_iter()
                .map(|new| inner.admit(new))
                .collect::<Vec<_>>()
        };

        debug!(count = ids.len(), "Documents added in bulk");
        self.autosave().await;
        Ok(ids)
    }

    /// Fetch a document by id.
    pub async fn get(&self, id: DocumentId) -> BigglesResult<Document> {
        let inner = self.inner.read().await;
        inner
            .positions
            .get(&id)
            .map(|&pos| inner.documents[pos].clone())
            .ok_or_else(|| BigglesError::NotFound(format!("document {id}")))
    }

    /// Documents matching every given criterion, in insertion order.
    pub async fn filter(&self, filter: &DocumentFilter) -> Vec<Document> {
        let inner = self.inner.read().await;
        inner
            .select(filter)
            .into_iter()
            .map(|pos| inner.documents[pos].clone())
            .collect()
    }

    /// Every document, in insertion order.
    pub async fn all(&self) -> Vec<Document> {
        self.inner.read().await.documents.clone()
    }

    /// Documents whose `parent_id` is `id`, in insertion order.
    pub async fn children(&self, id: DocumentId) -> BigglesResult<Vec<Document>> {
        let inner = self.inner.read().await;
        if !inner.positions.contains_key(&id) {
            return Err(BigglesError::NotFound(format!("document {id}")));
        }
        Ok(inner
            .documents
            .iter()
            .filter(|d| d.parent_id == Some(id))
            .cloned()
            .collect())
    }

    /// Number of documents.
    pub async fn len(&self) -> usize {
        self.inner.read().await.documents.len()
    }

    /// True when the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Append labels to an existing document. Tags can never be removed.
    pub async fn add_tags<I, S>(&self, id: DocumentId, tags: I) -> BigglesResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut inner = self.inner.write().await;
            let pos = *inner
                .positions
                .get(&id)
                .ok_or_else(|| BigglesError::NotFound(format!("document {id}")))?;
            for tag in tags.into_iter().map(Into::into) {
                if inner.documents[pos].tags.insert(tag.clone()) {
                    inner.by_tag.entry(tag).or_default().insert(pos);
                }
            }
        }
        self.autosave().await;
        Ok(())
    }

    /// Rank documents against `query`, best first, at most `k`.
    ///
    /// Ties keep insertion order. If the embedding provider fails the search
    /// is served in keyword mode and the outcome says so. In vector mode a
    /// document the provider cannot embed is not ranked at all; each such
    /// document is logged at warn level.
    pub async fn search(&self, query: &str, k: usize) -> SearchOutcome {
        self.search_filtered(query, k, &DocumentFilter::new()).await
    }

    /// [`search`](Self::search) restricted to documents matching `filter`.
    ///
    /// Candidates come from the contributor, kind and tag indices, so the
    /// filter narrows the ranked set rather than trimming the top `k`.
    pub async fn search_filtered(
        &self,
        query: &str,
        k: usize,
        filter: &DocumentFilter,
    ) -> SearchOutcome {
        let mode = self.search_mode();
        if query.trim().is_empty() || k == 0 {
            return SearchOutcome {
                mode,
                results: Vec::new(),
            };
        }

        if let Some(embedder) = &self.embedder {
            match self.vector_search(embedder.as_ref(), query, k, filter).await {
                Ok(results) => {
                    return SearchOutcome {
                        mode: SearchMode::Vector,
                        results,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Vector search failed, falling back to keyword search");
                }
            }
        }

        SearchOutcome {
            mode: SearchMode::Keyword,
            results: self.keyword_search(query, k, filter).await,
        }
    }

    async fn keyword_search(
        &self,
        query: &str,
        k: usize,
        filter: &DocumentFilter,
    ) -> Vec<SearchResult> {
        let mut terms: Vec<String> = Vec::new();
        for term in query.to_lowercase().split_whitespace() {
            if !terms.iter().any(|t| t == term) {
                terms.push(term.to_string());
            }
        }

        let inner = self.inner.read().await;
        let mut results: Vec<SearchResult> = inner
            .select(filter)
            .into_iter()
            .map(|pos| &inner.documents[pos])
            .filter_map(|doc| {
                let haystack = doc.content.to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (matched > 0).then(|| SearchResult {
                    document: doc.clone(),
                    score: matched as f32 / terms.len() as f32,
                })
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(k);
        results
    }

    async fn vector_search(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
        filter: &DocumentFilter,
    ) -> BigglesResult<Vec<SearchResult>> {
        let query_vec = embedder.embed(query).await?;
        self.ensure_embeddings(embedder).await?;

        let inner = self.inner.read().await;
        let mut results: Vec<SearchResult> = inner
            .select(filter)
            .into_iter()
            .map(|pos| &inner.documents[pos])
            .filter_map(|doc| {
                doc.embedding.as_ref().map(|emb| SearchResult {
                    document: doc.clone(),
                    score: cosine_similarity(&query_vec, emb),
                })
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(k);
        Ok(results)
    }

    /// Embed every document that has no embedding yet.
    async fn ensure_embeddings(&self, embedder: &dyn EmbeddingProvider) -> BigglesResult<()> {
        let _guard = self.embed_lock.lock().await;

        let pending: Vec<(DocumentId, String)> = {
            let inner = self.inner.read().await;
            inner
                .documents
                .iter()
                .filter(|d| d.embedding.is_none() && !d.content.trim().is_empty())
                .map(|d| (d.id, d.content.clone()))
                .collect()
        };
        if pending.is_empty() {
            return Ok(());
        }

        let mut computed = Vec::with_capacity(pending.len());
        for (id, content) in pending {
            match embedder.embed(&content).await {
                Ok(vector) if vector.len() != embedder.dimension() => {
                    return Err(BigglesError::Provider(format!(
                        "embedding has dimension {}, expected {}",
                        vector.len(),
                        embedder.dimension()
                    )))
                }
                // A non-finite component would make the snapshot unreadable.
                Ok(vector) if vector.iter().any(|x| !x.is_finite()) => {
                    warn!(id = %id, "Embedding has non-finite components; document left out of vector search");
                }
                Ok(vector) => computed.push((id, vector)),
                Err(e) => {
                    warn!(id = %id, error = %e, "Document not embeddable; left out of vector search");
                }
            }
        }

        let count = computed.len();
        let mut inner = self.inner.write().await;
        for (id, vector) in computed {
            if let Some(&pos) = inner.positions.get(&id) {
                let doc = &mut inner.documents[pos];
                if doc.embedding.is_none() {
                    doc.embedding = Some(vector);
                }
            }
        }
        debug!(count, "Embeddings computed");
        Ok(())
    }

    /// Snapshot without embeddings.
    pub async fn export(&self) -> KnowledgeSnapshot {
        self.export_with_embeddings().await.without_embeddings()
    }

    /// Snapshot including any embeddings computed so far.
    pub async fn export_with_embeddings(&self) -> KnowledgeSnapshot {
        KnowledgeSnapshot::new(self.all().await)
    }

    /// Replace the store's contents with a snapshot.
    ///
    /// The snapshot is fully validated first; on error the store is untouched.
    pub async fn import(&self, snapshot: KnowledgeSnapshot) -> BigglesResult<()> {
        check_version(&snapshot)?;
        let count = snapshot.documents.len();
        let rebuilt = StoreInner::from_documents(snapshot.documents)?;
        *self.inner.write().await = rebuilt;
        info!(documents = count, "Knowledge store imported");
        self.autosave().await;
        Ok(())
    }

    /// Counts by kind and contributor.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            total_documents: inner.documents.len(),
            by_kind: inner
                .by_kind
                .iter()
                .filter(|(_, set)| !set.is_empty())
                .map(|(kind, set)| (*kind, set.len()))
                .collect(),
            by_contributor: inner
                .by_contributor
                .iter()
                .map(|(c, set)| (c.clone(), set.len()))
                .collect(),
            total_tags: inner.by_tag.len(),
            search_mode: self.search_mode(),
        }
    }

    /// Session teardown: drop every document.
    pub async fn clear(&self) {
        *self.inner.write().await = StoreInner::default();
        info!("Knowledge store cleared");
        self.autosave().await;
    }

    /// Write the current state to the persistence path.
    pub async fn save(&self) -> BigglesResult<()> {
        let path = self.persist_path.as_ref().ok_or_else(|| {
            BigglesError::Config("knowledge store has no persistence path".to_string())
        })?;
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.export_with_embeddings().await;
        snapshot.write_to(path).await?;
        debug!(path = %path.display(), documents = snapshot.documents.len(), "Knowledge store saved");
        Ok(())
    }

    /// Best effort: a failed write never undoes the in-memory change.
    async fn autosave(&self) {
        if self.persist_path.is_none() {
            return;
        }
        if let Err(e) = self.save().await {
            warn!(error = %e, "Knowledge store autosave failed");
        }
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_version(snapshot: &KnowledgeSnapshot) -> BigglesResult<()> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(BigglesError::Validation(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }
    Ok(())
}

/// JSON has no NaN or infinity, so such floats would not survive a save.
fn check_attributes(attributes: &Attributes) -> BigglesResult<()> {
    for (key, value) in attributes {
        if let AttributeValue::Float(x) = value {
            if !x.is_finite() {
                return Err(BigglesError::Validation(format!(
                    "attribute '{key}' is {x}; only finite numbers can be stored"
                )));
            }
        }
    }
    Ok(())
}

/// Stable descending sort, so equal scores keep insertion order.
fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
