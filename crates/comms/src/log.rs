//! The per-document communication log and its derived views.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use facteur_core::SendEventId;

use crate::event::{ActionType, DeliveryStatus, SendEvent};

/// Ordered-by-insertion list of send events owned by one document.
///
/// Insertion order is *not* a display contract: consumers re-sort by
/// `created_at` (see [`CommunicationLog::display_entries`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommunicationLog {
    events: Vec<SendEvent>,
}

impl CommunicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<SendEvent>) -> Self {
        Self { events }
    }

    pub fn append(&mut self, event: SendEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SendEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: SendEventId) -> Option<&SendEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: SendEventId) -> Option<&mut SendEvent> {
        self.events.iter_mut().find(|e| e.id == id)
    }

    /// Entries for display, most recent first.
    pub fn display_entries(&self) -> Vec<&SendEvent> {
        let mut entries: Vec<&SendEvent> = self.events.iter().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    /// Whether an email (send or reminder) has actually been delivered.
    pub fn has_delivered_send(&self) -> bool {
        self.events.iter().any(|e| {
            e.status == DeliveryStatus::Sent
                && matches!(e.action_type, ActionType::Send | ActionType::Reminder)
        })
    }

    /// Whether any event is still awaiting a reconciliation pass.
    pub fn has_scheduled(&self) -> bool {
        self.events
            .iter()
            .any(|e| e.status == DeliveryStatus::Scheduled)
    }

    /// Scheduled events whose due time has been reached at `now`.
    pub fn due_event_ids(&self, now: DateTime<Utc>) -> Vec<SendEventId> {
        self.events
            .iter()
            .filter(|e| e.is_due(now))
            .map(|e| e.id)
            .collect()
    }

    /// 1-based chronological rank of every reminder event.
    ///
    /// Rank follows `created_at` ascending, independent of storage order and
    /// of any non-reminder events interleaved in the log. Computed, never
    /// persisted.
    pub fn reminder_ranks(&self) -> HashMap<SendEventId, usize> {
        let mut reminders: Vec<&SendEvent> = self
            .events
            .iter()
            .filter(|e| e.action_type == ActionType::Reminder)
            .collect();
        reminders.sort_by_key(|e| e.created_at);

        reminders
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i + 1))
            .collect()
    }
}

/// Display label for a reminder rank: "1st reminder", "2nd reminder", ...
pub fn reminder_label(rank: usize) -> String {
    format!("{} reminder", ordinal(rank))
}

fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    use facteur_core::DocumentId;

    use crate::draft::EmailDraft;

    fn draft() -> EmailDraft {
        EmailDraft::new("client@example.com", "Invoice", "Attached.")
    }

    fn event_at(action: ActionType, created_at: DateTime<Utc>) -> SendEvent {
        let mut event = SendEvent::from_draft(DocumentId::new(), action, &draft(), created_at);
        event.mark_sent("msg").unwrap();
        event
    }

    #[test]
    fn display_entries_are_most_recent_first() {
        let now = Utc::now();
        let mut log = CommunicationLog::new();
        let first = event_at(ActionType::Send, now - Duration::days(2));
        let second = event_at(ActionType::Reminder, now - Duration::days(1));
        let third = event_at(ActionType::Reminder, now);
        // Stored out of order on purpose.
        log.append(second.clone());
        log.append(third.clone());
        log.append(first.clone());

        let ids: Vec<_> = log.display_entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);
    }

    #[test]
    fn reminder_ranks_follow_creation_time_not_storage_order() {
        let now = Utc::now();
        let mut log = CommunicationLog::new();
        let r1 = event_at(ActionType::Reminder, now - Duration::days(3));
        let r2 = event_at(ActionType::Reminder, now - Duration::days(2));
        let r3 = event_at(ActionType::Reminder, now - Duration::days(1));
        // Interleave a plain send and store reminders shuffled.
        log.append(r3.clone());
        log.append(event_at(ActionType::Send, now - Duration::days(4)));
        log.append(r1.clone());
        log.append(r2.clone());

        let ranks = log.reminder_ranks();
        assert_eq!(ranks[&r1.id], 1);
        assert_eq!(ranks[&r2.id], 2);
        assert_eq!(ranks[&r3.id], 3);
        assert_eq!(ranks.len(), 3);
    }

    #[test]
    fn reminder_labels() {
        assert_eq!(reminder_label(1), "1st reminder");
        assert_eq!(reminder_label(2), "2nd reminder");
        assert_eq!(reminder_label(3), "3rd reminder");
        assert_eq!(reminder_label(4), "4th reminder");
        assert_eq!(reminder_label(11), "11th reminder");
        assert_eq!(reminder_label(22), "22nd reminder");
    }

    #[test]
    fn delivered_send_detection_ignores_downloads_and_failures() {
        let now = Utc::now();
        let mut log = CommunicationLog::new();
        log.append(SendEvent::download_record(DocumentId::new(), now));
        assert!(!log.has_delivered_send());

        let mut failed =
            SendEvent::from_draft(DocumentId::new(), ActionType::Send, &draft(), now);
        failed.mark_failed("smtp timeout").unwrap();
        log.append(failed);
        assert!(!log.has_delivered_send());

        log.append(event_at(ActionType::Send, now));
        assert!(log.has_delivered_send());
    }

    #[test]
    fn due_event_ids_ignore_terminal_and_future_events() {
        let now = Utc::now();
        let mut log = CommunicationLog::new();

        let due = SendEvent::deferred(
            DocumentId::new(),
            ActionType::Send,
            &draft(),
            now - Duration::hours(2),
            now - Duration::hours(1),
        )
        .unwrap();
        let future = SendEvent::deferred(
            DocumentId::new(),
            ActionType::Send,
            &draft(),
            now,
            now + Duration::hours(1),
        )
        .unwrap();
        log.append(due.clone());
        log.append(future);
        log.append(event_at(ActionType::Send, now));

        assert_eq!(log.due_event_ids(now), vec![due.id]);
    }

    proptest! {
        /// Ranks are a permutation-insensitive function of creation times:
        /// whatever order events are stored in, the i-th oldest reminder gets
        /// rank i+1.
        #[test]
        fn reminder_ranks_are_storage_order_independent(
            order in Just((0..5usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let base = Utc::now();
            let reminders: Vec<SendEvent> = (0..5)
                .map(|i| event_at(ActionType::Reminder, base + Duration::minutes(i)))
                .collect();

            let mut log = CommunicationLog::new();
            for &i in &order {
                log.append(reminders[i].clone());
            }

            let ranks = log.reminder_ranks();
            for (i, reminder) in reminders.iter().enumerate() {
                prop_assert_eq!(ranks[&reminder.id], i + 1);
            }
        }
    }
}
