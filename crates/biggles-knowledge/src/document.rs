use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Process-unique document identifier.
pub type DocumentId = Uuid;

/// Closed set of document categories. Determines index membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    /// Scout and history findings.
    ResearchFinding,
    /// Unprocessed worker output.
    WorkerRawOutput,
    /// Page text pulled from a link.
    FetchedWebContent,
    PaperSummary,
    NewsSummary,
    BookSummary,
    /// The synthesis report.
    FinalReport,
}

impl DocumentKind {
    /// Every kind, in declaration order.
    pub const ALL: [DocumentKind; 7] = [
        DocumentKind::ResearchFinding,
        DocumentKind::WorkerRawOutput,
        DocumentKind::FetchedWebContent,
        DocumentKind::PaperSummary,
        DocumentKind::NewsSummary,
        DocumentKind::BookSummary,
        DocumentKind::FinalReport,
    ];

    /// Wire name, as used in snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::ResearchFinding => "research-finding",
            DocumentKind::WorkerRawOutput => "worker-raw-output",
            DocumentKind::FetchedWebContent => "fetched-web-content",
            DocumentKind::PaperSummary => "paper-summary",
            DocumentKind::NewsSummary => "news-summary",
            DocumentKind::BookSummary => "book-summary",
            DocumentKind::FinalReport => "final-report",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value shapes allowed in a document's attribute map.
///
/// Untagged on the wire, so `{"attempt": 2, "links": ["https://a"]}` reads
/// naturally. Integers are tried before floats; `1.0` stays a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    /// Must be finite for the store to accept it.
    Float(f64),
    Text(String),
    TextList(Vec<String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::TextList(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::TextList(value)
    }
}

/// Attribute map, ordered by key for deterministic snapshots.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A unit of knowledge contributed by a worker.
///
/// Only `tags` (append) and `embedding` (set once, lazily) ever change after
/// creation, and only through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Assigned by the store, never reused.
    pub id: DocumentId,
    /// Immutable body text.
    pub content: String,
    pub kind: DocumentKind,
    /// Id of the worker or operator that produced the document.
    pub contributor: String,
    pub created_at: DateTime<Utc>,
    /// Free-form labels. Append-only.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: Attributes,
    /// Computed lazily by vector search. Omitted from plain exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// The document this one derives from. Always refers to an earlier document.
    #[serde(default)]
    pub parent_id: Option<DocumentId>,
}

impl Document {
    /// True if the document carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Look up one attribute.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// Everything a caller supplies when adding a document.
///
/// Fields mirror [`Document`]; the store fills in the id, the timestamp and
/// the embedding.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub content: String,
    /// Must not be blank.
    pub contributor: String,
    pub kind: DocumentKind,
    pub tags: BTreeSet<String>,
    pub attributes: Attributes,
    /// Must name a document already in the store.
    pub parent_id: Option<DocumentId>,
}

impl NewDocument {
    pub fn new(
        content: impl Into<String>,
        contributor: impl Into<String>,
        kind: DocumentKind,
    ) -> Self {
        Self {
            content: content.into(),
            contributor: contributor.into(),
            kind,
            tags: BTreeSet::new(),
            attributes: Attributes::new(),
            parent_id: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent_id: DocumentId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Conjunctive filter over the three indices. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    /// Exact contributor id.
    pub contributor: Option<String>,
    pub kind: Option<DocumentKind>,
    /// One tag the document must carry.
    pub tag: Option<String>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contributor(mut self, contributor: impl Into<String>) -> Self {
        self.contributor = Some(contributor.into());
        self
    }

    pub fn kind(mut self, kind: DocumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// True when no criterion is set.
    pub fn is_empty(&self) -> bool {
        self.contributor.is_none() && self.kind.is_none() && self.tag.is_none()
    }

    /// Direct predicate, independent of the store's indices.
    pub fn matches(&self, document: &Document) -> bool {
        self.contributor
            .as_deref()
            .map_or(true, |c| document.contributor == c)
            && self.kind.map_or(true, |k| document.kind == k)
            && self.tag.as_deref().map_or(true, |t| document.has_tag(t))
    }
}
