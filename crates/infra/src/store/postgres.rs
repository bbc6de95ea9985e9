//! Postgres-backed document store.
//!
//! One `send_events` row per event, foreign-keyed to `documents`. Appending
//! an event and closing out a scheduled one touch different rows, so the two
//! writer paths (immediate send completing, reconciliation pass) cannot lose
//! each other's updates the way a shared log blob could.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use facteur_core::{DocumentId, SocietyId};
use facteur_comms::{
    CommunicationLog, Document, DocumentKind, DocumentStatus, SendEvent,
};

use super::{DocumentStore, StoreError};

/// Postgres-backed document store.
///
/// Uses the shared SQLx connection pool; all multi-row mutations run inside a
/// transaction.
#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id          UUID PRIMARY KEY,
    society_id  UUID NOT NULL,
    kind        TEXT NOT NULL,
    number      TEXT NOT NULL,
    status      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS send_events (
    id           UUID PRIMARY KEY,
    document_id  UUID NOT NULL REFERENCES documents (id),
    created_at   TIMESTAMPTZ NOT NULL,
    scheduled_at TIMESTAMPTZ,
    status       TEXT NOT NULL,
    payload      JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_send_events_document
    ON send_events (document_id, created_at);
CREATE INDEX IF NOT EXISTS idx_send_events_scheduled
    ON send_events (document_id) WHERE status = 'scheduled';
"#;

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Insert a document row together with its current log (seed/import path).
    pub async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_document", e))?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, society_id, kind, number, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(document.id.as_uuid())
        .bind(document.society_id.as_uuid())
        .bind(document.kind.as_str())
        .bind(&document.number)
        .bind(document.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;

        for event in document.log.events() {
            insert_event(&mut tx, document.id, event).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_document", e))?;
        Ok(())
    }

    async fn load_log(&self, document_id: DocumentId) -> Result<CommunicationLog, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM send_events
            WHERE document_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(document_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_log", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row
                .try_get("payload")
                .map_err(|e| map_sqlx_error("load_log", e))?;
            let event: SendEvent = serde_json::from_value(payload)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            events.push(event);
        }
        Ok(CommunicationLog::from_events(events))
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self), fields(document_id = %id))]
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, society_id, kind, number, status
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut document = document_from_row(&row)?;
        document.log = self.load_log(id).await?;
        Ok(Some(document))
    }

    #[instrument(skip(self))]
    async fn find_with_scheduled(&self) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.society_id, d.kind, d.number, d.status
            FROM documents d
            WHERE d.status NOT IN ('archived', 'deleted')
              AND EXISTS (
                  SELECT 1 FROM send_events e
                  WHERE e.document_id = d.id AND e.status = 'scheduled'
              )
            ORDER BY d.id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_with_scheduled", e))?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let mut document = document_from_row(&row)?;
            match self.load_log(document.id).await {
                Ok(log) => {
                    document.log = log;
                    candidates.push(document);
                }
                Err(StoreError::Serialization(err)) => {
                    warn!(
                        document_id = %document.id,
                        error = %err,
                        "skipping document with undecodable log"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Ok(candidates)
    }

    #[instrument(skip(self, event), fields(document_id = %document_id, event_id = %event.id))]
    async fn append_event(
        &self,
        document_id: DocumentId,
        event: &SendEvent,
        new_status: Option<DocumentStatus>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("append_event", e))?;

        insert_event(&mut tx, document_id, event).await?;

        if let Some(status) = new_status {
            update_status(&mut tx, document_id, status).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("append_event", e))?;
        Ok(())
    }

    #[instrument(skip(self, events), fields(document_id = %document_id, event_count = events.len()))]
    async fn close_out(
        &self,
        document_id: DocumentId,
        events: &[SendEvent],
        new_status: Option<DocumentStatus>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("close_out", e))?;

        for event in events {
            let payload = serde_json::to_value(event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let result = sqlx::query(
                r#"
                UPDATE send_events
                SET status = $2, payload = $3
                WHERE id = $1 AND document_id = $4
                "#,
            )
            .bind(event.id.as_uuid())
            .bind(event.status.as_str())
            .bind(payload)
            .bind(document_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("close_out", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::EventNotFound(event.id));
            }
        }

        if let Some(status) = new_status {
            update_status(&mut tx, document_id, status).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("close_out", e))?;
        Ok(())
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    document_id: DocumentId,
    event: &SendEvent,
) -> Result<(), StoreError> {
    let payload =
        serde_json::to_value(event).map_err(|e| StoreError::Serialization(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO send_events (id, document_id, created_at, scheduled_at, status, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(event.id.as_uuid())
    .bind(document_id.as_uuid())
    .bind(event.created_at)
    .bind(event.scheduled_at)
    .bind(event.status.as_str())
    .bind(payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_event", e))?;
    Ok(())
}

async fn update_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    document_id: DocumentId,
    status: DocumentStatus,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE documents SET status = $2 WHERE id = $1")
        .bind(document_id.as_uuid())
        .bind(status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(document_id));
    }
    Ok(())
}

fn document_from_row(row: &sqlx::postgres::PgRow) -> Result<Document, StoreError> {
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("decode", e))?;
    let society_id: Uuid = row
        .try_get("society_id")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let kind: String = row
        .try_get("kind")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let number: String = row
        .try_get("number")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("decode", e))?;

    Ok(Document {
        id: DocumentId::from_uuid(id),
        society_id: SocietyId::from_uuid(society_id),
        kind: DocumentKind::from_str(&kind)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        number,
        status: DocumentStatus::from_str(&status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        log: CommunicationLog::new(),
    })
}

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("{operation}: {error}"))
}
