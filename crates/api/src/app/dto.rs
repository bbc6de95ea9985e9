use serde::{Deserialize, Serialize};

use facteur_comms::{
    reminder_label, ActionType, Attachment, CommunicationLog, EmailDraft, SendEvent,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Force reminder classification (explicit "resend" in the client).
    #[serde(default)]
    pub is_resend: bool,
    /// Prior log entry this send follows up on (resend threading).
    #[serde(default)]
    pub related_event_id: Option<facteur_core::SendEventId>,
}

impl SendRequest {
    pub fn into_draft(self) -> (EmailDraft, bool) {
        let draft = EmailDraft {
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            message: self.message,
            attachments: self.attachments,
            related_event_id: self.related_event_id,
        };
        (draft, self.is_resend)
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(flatten)]
    pub draft: SendRequest,
    /// RFC3339 due time; must not be in the past.
    pub scheduled_at: String,
}

// -------------------------
// Response DTOs
// -------------------------

/// One communication log entry as shown in the document's history panel.
#[derive(Debug, Serialize)]
pub struct CommunicationEntry {
    pub id: String,
    pub action_type: ActionType,
    pub status: facteur_comms::DeliveryStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub to: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Display badge, e.g. "2nd reminder"; only set on reminder entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Log entries most recent first, reminder badges included.
pub fn communication_entries(log: &CommunicationLog) -> Vec<CommunicationEntry> {
    let ranks = log.reminder_ranks();
    log.display_entries()
        .into_iter()
        .map(|event| entry_from_event(event, ranks.get(&event.id).copied()))
        .collect()
}

fn entry_from_event(event: &SendEvent, rank: Option<usize>) -> CommunicationEntry {
    CommunicationEntry {
        id: event.id.to_string(),
        action_type: event.action_type,
        status: event.status,
        created_at: event.created_at,
        scheduled_at: event.scheduled_at,
        to: event.to.clone(),
        subject: event.subject.clone(),
        related_event_id: event.related_event_id.map(|id| id.to_string()),
        error: event.error.clone(),
        label: rank.map(reminder_label),
        attachments: event.attachments.clone(),
    }
}
