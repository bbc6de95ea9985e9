//! In-memory document store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use facteur_core::DocumentId;
use facteur_comms::{CommunicationLog, Document, DocumentStatus, SendEvent};

use super::{DocumentStore, StoreError};

/// Events are held as JSON rows and decoded on read, like the durable store,
/// so the per-document decode-failure skip path behaves the same here.
#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    events: Vec<serde_json::Value>,
}

/// In-memory document store for tests/dev.
///
/// All writes go through one lock, so writers are serialized.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, StoredDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed a document (its current log included).
    pub fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        let events = document
            .log
            .events()
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut stored = StoredDocument { document, events };
        stored.document.log = CommunicationLog::new();
        self.documents
            .write()
            .unwrap()
            .insert(stored.document.id, stored);
        Ok(())
    }

    /// Inject a raw event row, bypassing the domain model. Lets tests
    /// exercise the decode-failure skip path.
    pub fn inject_raw_event(&self, document_id: DocumentId, row: serde_json::Value) {
        if let Some(stored) = self.documents.write().unwrap().get_mut(&document_id) {
            stored.events.push(row);
        }
    }

    fn decode(stored: &StoredDocument) -> Result<Document, StoreError> {
        let events = stored
            .events
            .iter()
            .map(|row| serde_json::from_value::<SendEvent>(row.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut document = stored.document.clone();
        document.log = CommunicationLog::from_events(events);
        Ok(document)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let documents = self.documents.read().unwrap();
        match documents.get(&id) {
            Some(stored) => Ok(Some(Self::decode(stored)?)),
            None => Ok(None),
        }
    }

    async fn find_with_scheduled(&self) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.read().unwrap();
        let mut candidates = Vec::new();

        for stored in documents.values() {
            if !stored.document.is_active() {
                continue;
            }
            match Self::decode(stored) {
                Ok(document) => {
                    if document.log.has_scheduled() {
                        candidates.push(document);
                    }
                }
                Err(err) => {
                    warn!(
                        document_id = %stored.document.id,
                        error = %err,
                        "skipping document with undecodable log"
                    );
                }
            }
        }

        // Deterministic order for callers and tests.
        candidates.sort_by_key(|d| *d.id.as_uuid());
        Ok(candidates)
    }

    async fn append_event(
        &self,
        document_id: DocumentId,
        event: &SendEvent,
        new_status: Option<DocumentStatus>,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap();
        let stored = documents
            .get_mut(&document_id)
            .ok_or(StoreError::NotFound(document_id))?;

        let row = serde_json::to_value(event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        stored.events.push(row);

        if let Some(status) = new_status {
            stored.document.status = status;
        }
        Ok(())
    }

    async fn close_out(
        &self,
        document_id: DocumentId,
        events: &[SendEvent],
        new_status: Option<DocumentStatus>,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap();
        let stored = documents
            .get_mut(&document_id)
            .ok_or(StoreError::NotFound(document_id))?;

        for event in events {
            let id = event.id.as_uuid().to_string();
            let row = stored
                .events
                .iter_mut()
                .find(|row| row.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
                .ok_or(StoreError::EventNotFound(event.id))?;
            *row = serde_json::to_value(event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
        }

        if let Some(status) = new_status {
            stored.document.status = status;
        }
        Ok(())
    }
}
