//! Document storage seam.
//!
//! The communication log is stored one row per send event (not as a JSON
//! blob on the document), so the two writers that can touch the same
//! document (an immediate send completing and a reconciliation pass)
//! always write disjoint rows.

use async_trait::async_trait;

use facteur_core::{DocumentId, SendEventId};
use facteur_comms::{Document, DocumentStatus, SendEvent};

mod in_memory;
mod postgres;

pub use in_memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;

/// Document store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),
    #[error("send event not found: {0}")]
    EventNotFound(SendEventId),
    /// A stored event could not be decoded back into the domain model.
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence collaborator for documents and their communication logs.
///
/// Append and close-out are the only mutations; events are never deleted.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document with its full log.
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    /// Candidate set for a reconciliation pass: active (non-deleted,
    /// non-archived) documents holding at least one `scheduled` event.
    ///
    /// A document whose stored events fail to decode is skipped with a
    /// warning; it must not abort the scan for the others.
    async fn find_with_scheduled(&self) -> Result<Vec<Document>, StoreError>;

    /// Atomically insert one new event, optionally updating the document's
    /// lifecycle status in the same call.
    async fn append_event(
        &self,
        document_id: DocumentId,
        event: &SendEvent,
        new_status: Option<DocumentStatus>,
    ) -> Result<(), StoreError>;

    /// Persist the close-out of previously `scheduled` events (one store
    /// write per document per reconciliation pass), optionally updating the
    /// document's lifecycle status.
    async fn close_out(
        &self,
        document_id: DocumentId,
        events: &[SendEvent],
        new_status: Option<DocumentStatus>,
    ) -> Result<(), StoreError>;
}
