//! Outbound email drafts.

use serde::{Deserialize, Serialize};

use facteur_core::{DomainError, DomainResult, SendEventId};

use crate::event::{ActionType, Attachment};
use crate::log::CommunicationLog;

/// The content a user composed, before any event exists for it.
///
/// A cancelled grace-window send hands this back unmodified for re-editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Prior event this draft follows up on (reminder threading).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_event_id: Option<SendEventId>,
}

impl EmailDraft {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            cc: None,
            bcc: None,
            subject: subject.into(),
            message: message.into(),
            attachments: Vec::new(),
            related_event_id: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn in_reply_to(mut self, event_id: SendEventId) -> Self {
        self.related_event_id = Some(event_id);
        self
    }

    /// Checked before any event is created; failures surface synchronously.
    pub fn validate(&self) -> DomainResult<()> {
        if self.to.trim().is_empty() {
            return Err(DomainError::validation("recipient is required"));
        }
        if self.subject.trim().is_empty() {
            return Err(DomainError::validation("subject is required"));
        }
        if self.message.trim().is_empty() {
            return Err(DomainError::validation("message is required"));
        }
        Ok(())
    }

    /// `Reminder` once the document already has a delivered send, else `Send`.
    pub fn classify(&self, log: &CommunicationLog, is_resend: bool) -> ActionType {
        if is_resend || log.has_delivered_send() {
            ActionType::Reminder
        } else {
            ActionType::Send
        }
    }
}
