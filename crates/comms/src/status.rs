//! Status resolver: document lifecycle side effects derived from the log.

use crate::document::DocumentStatus;
use crate::log::CommunicationLog;

/// Derive the document's next lifecycle status from its log.
///
/// Pure function. Fires only while the document is still in the pre-send set
/// (`Draft`, `Downloaded`) and the log holds at least one delivered send or
/// reminder; then yields `Sent`. Returns `None` for "no change". Monotonic by
/// status membership: once a document left the pre-send set this never fires
/// again, so later sends and reminders cause no duplicate transition.
pub fn resolve_status(current: DocumentStatus, log: &CommunicationLog) -> Option<DocumentStatus> {
    if current.is_pre_send() && log.has_delivered_send() {
        Some(DocumentStatus::Sent)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use facteur_core::DocumentId;

    use crate::draft::EmailDraft;
    use crate::event::{ActionType, SendEvent};

    fn delivered(action: ActionType) -> SendEvent {
        let draft = EmailDraft::new("client@example.com", "Invoice", "Attached.");
        let mut event = SendEvent::from_draft(DocumentId::new(), action, &draft, Utc::now());
        event.mark_sent("msg").unwrap();
        event
    }

    #[test]
    fn draft_with_delivered_send_becomes_sent() {
        let mut log = CommunicationLog::new();
        log.append(delivered(ActionType::Send));

        assert_eq!(
            resolve_status(DocumentStatus::Draft, &log),
            Some(DocumentStatus::Sent)
        );
        assert_eq!(
            resolve_status(DocumentStatus::Downloaded, &log),
            Some(DocumentStatus::Sent)
        );
    }

    #[test]
    fn empty_or_undelivered_log_changes_nothing() {
        let log = CommunicationLog::new();
        assert_eq!(resolve_status(DocumentStatus::Draft, &log), None);

        let mut failed_only = CommunicationLog::new();
        let draft = EmailDraft::new("client@example.com", "Invoice", "Attached.");
        let mut event =
            SendEvent::from_draft(DocumentId::new(), ActionType::Send, &draft, Utc::now());
        event.mark_failed("invalid recipient").unwrap();
        failed_only.append(event);
        assert_eq!(resolve_status(DocumentStatus::Draft, &failed_only), None);
    }

    #[test]
    fn transition_is_monotonic() {
        let mut log = CommunicationLog::new();
        log.append(delivered(ActionType::Send));

        let sent = resolve_status(DocumentStatus::Draft, &log).unwrap();
        assert_eq!(sent, DocumentStatus::Sent);

        // A second successful reminder must not fire the resolver again.
        log.append(delivered(ActionType::Reminder));
        assert_eq!(resolve_status(sent, &log), None);

        // Nor does it fire for post-send statuses.
        assert_eq!(resolve_status(DocumentStatus::Paid, &log), None);
        assert_eq!(resolve_status(DocumentStatus::Cancelled, &log), None);
    }
}
