//! The delivery gateway seam.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use facteur_comms::{Attachment, EmailDraft, SendEvent};

use crate::config::SenderConfig;
use crate::error::MailerError;

/// A fully-resolved message handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    /// Build the wire message from a draft; the HTML body is the plain text
    /// with newlines as `<br>`.
    pub fn from_draft(draft: &EmailDraft) -> Self {
        Self {
            to: draft.to.clone(),
            cc: draft.cc.clone(),
            bcc: draft.bcc.clone(),
            subject: draft.subject.clone(),
            text_body: draft.message.clone(),
            html_body: draft.message.replace('\n', "<br>"),
            attachments: draft.attachments.clone(),
        }
    }

    /// Build the wire message from a persisted scheduled event (the
    /// reconciliation path; attachment payloads were retained at scheduling
    /// time).
    pub fn from_event(event: &SendEvent) -> Self {
        Self {
            to: event.to.clone(),
            cc: event.cc.clone(),
            bcc: event.bcc.clone(),
            subject: event.subject.clone(),
            text_body: event.message.clone(),
            html_body: event.message.replace('\n', "<br>"),
            attachments: event.attachments.clone(),
        }
    }
}

/// What the transport reported back on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Opaque transport message id.
    pub message_id: String,
    /// Present when the transport offers a hosted preview (dev transports).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

/// Performs the actual transmission. External collaborator boundary: the
/// production implementation wraps the SMTP/OAuth transport and lives with
/// the rest of the operational glue, outside this workspace's concern.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    async fn send(
        &self,
        message: &OutboundMessage,
        config: &SenderConfig,
    ) -> Result<DeliveryReceipt, MailerError>;
}

/// In-memory gateway for tests/dev: records every message and can be scripted
/// to fail.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    sent: Mutex<Vec<OutboundMessage>>,
    fail_with: Mutex<Option<String>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail with `error`.
    pub fn fail_with(&self, error: impl Into<String>) {
        *self.fail_with.lock().unwrap() = Some(error.into());
    }

    /// Restore the default always-succeed behaviour.
    pub fn succeed(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryGateway for InMemoryGateway {
    async fn send(
        &self,
        message: &OutboundMessage,
        config: &SenderConfig,
    ) -> Result<DeliveryReceipt, MailerError> {
        config.validate()?;
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(MailerError::Delivery(error));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(DeliveryReceipt {
            message_id: format!("<{}@in-memory>", Uuid::now_v7()),
            preview_url: None,
        })
    }
}
