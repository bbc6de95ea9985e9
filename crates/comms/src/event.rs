//! Send events: one entry per attempted, recorded or scheduled communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use facteur_core::{DocumentId, DomainError, DomainResult, SendEventId};

use crate::draft::EmailDraft;

/// What kind of communication an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// First outbound email for the document.
    Send,
    /// Follow-up after a prior delivered send (numbered for display).
    Reminder,
    /// Record of a local PDF download; no email involved.
    Download,
}

/// Delivery state of an event. `Scheduled` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Scheduled,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Scheduled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Scheduled => "scheduled",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// An email attachment.
///
/// `content` (base64) is only guaranteed present up to the point of delivery;
/// after a successful send it is dropped and only `size` is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: String) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: Some(content),
            size: None,
        }
    }

    /// Drop the payload, keeping the decoded size for display.
    pub fn strip_content(&mut self) {
        if let Some(content) = self.content.take() {
            // base64: 4 characters encode 3 bytes.
            self.size = Some((content.len() as u64 * 3).div_ceil(4));
        }
    }
}

/// One entry in a document's communication log.
///
/// Created once, never deleted. The only permitted mutation of a persisted
/// event is the `scheduled -> sent | failed` close-out (plus the fields set on
/// that same transition); see [`SendEvent::mark_sent`] / [`SendEvent::mark_failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEvent {
    pub id: SendEventId,
    pub document_id: DocumentId,
    pub created_at: DateTime<Utc>,
    /// Present only for deferred sends; always >= `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub action_type: ActionType,
    /// Prior event this one follows up on (reminder threading, display only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_event_id: Option<SendEventId>,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_message_id: Option<String>,
}

impl SendEvent {
    /// A pending outbound event built from a draft.
    ///
    /// Starts in `Scheduled`; the immediate-send path closes it out in the
    /// same flow, the scheduler persists it as-is with a due time.
    pub fn from_draft(
        document_id: DocumentId,
        action_type: ActionType,
        draft: &EmailDraft,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SendEventId::new(),
            document_id,
            created_at,
            scheduled_at: None,
            action_type,
            related_event_id: draft.related_event_id,
            to: draft.to.clone(),
            cc: draft.cc.clone(),
            bcc: draft.bcc.clone(),
            subject: draft.subject.clone(),
            message: draft.message.clone(),
            attachments: draft.attachments.clone(),
            status: DeliveryStatus::Scheduled,
            error: None,
            delivered_message_id: None,
        }
    }

    /// A deferred send due at `scheduled_at`.
    ///
    /// Attachment payloads are retained in full; they must survive until the
    /// reconciliation pass delivers the event.
    pub fn deferred(
        document_id: DocumentId,
        action_type: ActionType,
        draft: &EmailDraft,
        created_at: DateTime<Utc>,
        scheduled_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if scheduled_at < created_at {
            return Err(DomainError::validation(
                "scheduled_at cannot be before creation time",
            ));
        }
        let mut event = Self::from_draft(document_id, action_type, draft, created_at);
        event.scheduled_at = Some(scheduled_at);
        Ok(event)
    }

    /// A terminal record of a local PDF download (no recipient, no message).
    pub fn download_record(document_id: DocumentId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: SendEventId::new(),
            document_id,
            created_at,
            scheduled_at: None,
            action_type: ActionType::Download,
            related_event_id: None,
            to: String::new(),
            cc: None,
            bcc: None,
            subject: String::new(),
            message: String::new(),
            attachments: Vec::new(),
            status: DeliveryStatus::Sent,
            error: None,
            delivered_message_id: None,
        }
    }

    /// Close out as delivered. Drops attachment payloads (retention).
    pub fn mark_sent(&mut self, message_id: impl Into<String>) -> DomainResult<()> {
        self.ensure_open()?;
        self.status = DeliveryStatus::Sent;
        self.delivered_message_id = Some(message_id.into());
        for att in &mut self.attachments {
            att.strip_content();
        }
        Ok(())
    }

    /// Close out as failed, recording the gateway diagnostic. Not retried.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.ensure_open()?;
        self.status = DeliveryStatus::Failed;
        self.error = Some(error.into());
        Ok(())
    }

    fn ensure_open(&self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "send event {} is already terminal",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether a reconciliation pass at `now` must deliver this event.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Scheduled
            && self.scheduled_at.is_some_and(|at| at <= now)
    }
}
