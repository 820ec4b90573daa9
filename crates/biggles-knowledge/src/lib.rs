//! Shared knowledge store for research workers.
//!
//! Workers append typed documents; later stages read them back by
//! contributor, kind, tag, or similarity to a query. The store keeps its
//! secondary indices exactly consistent with the canonical document list and
//! can be exported to (and rebuilt from) a serializable snapshot.
//!
//! # Main types
//!
//! - [`KnowledgeStore`] — The concurrent document repository.
//! - [`Document`] — An immutable unit of contributed knowledge.
//! - [`NewDocument`] — Builder for [`KnowledgeStore::add`].
//! - [`DocumentFilter`] — Intersecting contributor/kind/tag filter.
//! - [`EmbeddingProvider`] — Trait for the optional semantic search capability.
//! - [`LocalEmbedding`] — Dependency-free hashing embedding.
//! - [`KnowledgeSnapshot`] — Serializable export of a store.

/// Document types and filters.
pub mod document;
/// Embedding provider trait and local implementation.
pub mod embedding;
/// Snapshot format for export/import and persistence.
pub mod snapshot;
/// The knowledge store itself.
pub mod store;

pub use document::{
    AttributeValue, Attributes, Document, DocumentFilter, DocumentId, DocumentKind, NewDocument,
};
pub use embedding::{EmbeddingProvider, LocalEmbedding};
pub use snapshot::{KnowledgeSnapshot, SNAPSHOT_VERSION};
pub use store::{KnowledgeStore, SearchMode, SearchOutcome, SearchResult, StoreStats};
