//! Future-dated sends.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use facteur_comms::{EmailDraft, SendEvent};
use facteur_core::{DocumentId, DomainError, SendEventId};
use facteur_mailer::SenderConfigResolver;

use crate::error::SendError;
use crate::store::DocumentStore;

/// Records a send for a future due time.
///
/// Scheduling only appends an open `scheduled` event; transmission is the
/// reconciliation pass's job. Attachment payloads are kept on the event so
/// the pass can transmit without re-resolving the document's files.
pub struct ScheduledSender {
    store: Arc<dyn DocumentStore>,
    configs: Arc<dyn SenderConfigResolver>,
}

impl ScheduledSender {
    pub fn new(store: Arc<dyn DocumentStore>, configs: Arc<dyn SenderConfigResolver>) -> Self {
        Self { store, configs }
    }

    /// Schedule `draft` for transmission at `scheduled_at`.
    ///
    /// The document's lifecycle status is untouched: a scheduled send has not
    /// happened yet.
    pub async fn schedule(
        &self,
        document_id: DocumentId,
        draft: EmailDraft,
        scheduled_at: DateTime<Utc>,
        is_resend: bool,
    ) -> Result<SendEventId, SendError> {
        self.schedule_at(document_id, draft, scheduled_at, is_resend, Utc::now())
            .await
    }

    pub(crate) async fn schedule_at(
        &self,
        document_id: DocumentId,
        draft: EmailDraft,
        scheduled_at: DateTime<Utc>,
        is_resend: bool,
        now: DateTime<Utc>,
    ) -> Result<SendEventId, SendError> {
        draft.validate()?;
        if scheduled_at < now {
            return Err(DomainError::validation("scheduled time is in the past").into());
        }

        let document = self
            .store
            .get(document_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        // Surface a missing sender configuration now rather than at due time.
        self.configs.resolve(document.society_id)?;

        let action = draft.classify(&document.log, is_resend);
        let event = SendEvent::deferred(document_id, action, &draft, now, scheduled_at)?;
        let event_id = event.id;

        self.store.append_event(document_id, &event, None).await?;
        info!(%document_id, %event_id, %scheduled_at, "send scheduled");
        Ok(event_id)
    }
}
