//! Immediate sends behind a short cancellable grace window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use facteur_comms::{resolve_status, DeliveryStatus, EmailDraft, SendEvent};
use facteur_core::{DocumentId, DomainError, SendEventId};
use facteur_mailer::{DeliveryGateway, OutboundMessage, SenderConfigResolver};

use crate::error::SendError;
use crate::store::DocumentStore;

/// Default grace window before an immediate send actually goes out.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(4);

/// What happened once the grace window elapsed.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub event_id: SendEventId,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// Handle to one in-flight grace window.
///
/// Owns the single-shot cancel token for this send. Dropping the handle
/// without calling [`PendingSend::cancel`] abandons the send: the background
/// task observes the closed channel and never transmits (the session-loss
/// behaviour of an undismissed composer).
#[derive(Debug)]
pub struct PendingSend {
    cancel: Option<oneshot::Sender<()>>,
    outcome: oneshot::Receiver<SendOutcome>,
    draft: EmailDraft,
}

impl PendingSend {
    /// Cancel the pending send.
    ///
    /// Returns the original draft, unmodified, for re-editing when the timer
    /// had not yet fired; `None` (and no other effect) when it already had.
    pub fn cancel(mut self) -> Option<EmailDraft> {
        match self.cancel.take() {
            Some(token) => token.send(()).ok().map(|_| self.draft),
            None => None,
        }
    }

    /// Whether the grace window has already expired (or the send was
    /// cancelled); a `false` here means [`PendingSend::cancel`] would still
    /// win the race.
    pub fn fired(&self) -> bool {
        self.cancel.as_ref().is_none_or(|token| token.is_closed())
    }

    /// Wait for the grace window to elapse and delivery to finish.
    ///
    /// `None` when the send was cancelled (or the session dropped it).
    pub async fn outcome(self) -> Option<SendOutcome> {
        self.outcome.await.ok()
    }
}

/// Deferred-send controller: validates up front, returns immediately, and
/// transmits only after the grace window survives uncancelled.
///
/// Exactly one event is appended per non-cancelled send; none per cancelled
/// send. The pending timer lives only as long as the session that started
/// it; durable deferral is the scheduler's job.
pub struct DeferredSender {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn DeliveryGateway>,
    configs: Arc<dyn SenderConfigResolver>,
    grace: Duration,
}

impl DeferredSender {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn DeliveryGateway>,
        configs: Arc<dyn SenderConfigResolver>,
    ) -> Self {
        Self {
            store,
            gateway,
            configs,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start an immediate send.
    ///
    /// Validates the draft and that the document's sender configuration
    /// resolves, then hands back control; the actual transmission happens on
    /// a background task after the grace window.
    pub async fn send(
        &self,
        document_id: DocumentId,
        draft: EmailDraft,
        is_resend: bool,
    ) -> Result<PendingSend, SendError> {
        draft.validate()?;
        let document = self
            .store
            .get(document_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        // Fail fast while the user is still looking at the composer.
        self.configs.resolve(document.society_id)?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let (outcome_tx, outcome_rx) = oneshot::channel::<SendOutcome>();

        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        let configs = Arc::clone(&self.configs);
        let grace = self.grace;
        let task_draft = draft.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = &mut cancel_rx => {
                    debug!(%document_id, "send cancelled within grace window");
                    return;
                }
            }
            // A cancel that raced the timer still wins; past this point the
            // token is dead and cancel() is a no-op.
            if cancel_rx.try_recv().is_ok() {
                debug!(%document_id, "send cancelled at grace window expiry");
                return;
            }
            drop(cancel_rx);

            let outcome =
                execute_send(&*store, &*gateway, &*configs, document_id, &task_draft, is_resend)
                    .await;
            if let Some(outcome) = outcome {
                let _ = outcome_tx.send(outcome);
            }
        });

        Ok(PendingSend {
            cancel: Some(cancel_tx),
            outcome: outcome_rx,
            draft,
        })
    }
}

/// Deliver and append the terminal event. Gateway failures are recorded on
/// the event, not retried; store failures can only be logged at this point,
/// the initiating call returned long ago.
async fn execute_send(
    store: &dyn DocumentStore,
    gateway: &dyn DeliveryGateway,
    configs: &dyn SenderConfigResolver,
    document_id: DocumentId,
    draft: &EmailDraft,
    is_resend: bool,
) -> Option<SendOutcome> {
    let document = match store.get(document_id).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            warn!(%document_id, "document vanished before grace window expiry");
            return None;
        }
        Err(err) => {
            warn!(%document_id, error = %err, "failed to reload document for send");
            return None;
        }
    };

    let action = draft.classify(&document.log, is_resend);
    let mut event = SendEvent::from_draft(document_id, action, draft, Utc::now());

    let delivery = match configs.resolve(document.society_id) {
        Ok(config) => {
            let message = OutboundMessage::from_draft(draft);
            gateway.send(&message, &config).await
        }
        Err(err) => Err(err),
    };

    let close_out = match delivery {
        Ok(receipt) => event.mark_sent(receipt.message_id),
        Err(err) => event.mark_failed(err.to_string()),
    };
    if let Err(err) = close_out {
        warn!(%document_id, event_id = %event.id, error = %err, "event close-out rejected");
        return None;
    }

    let mut log = document.log.clone();
    log.append(event.clone());
    let new_status = resolve_status(document.status, &log);

    if let Err(err) = store.append_event(document_id, &event, new_status).await {
        warn!(%document_id, event_id = %event.id, error = %err, "failed to persist send event");
    }

    Some(SendOutcome {
        event_id: event.id,
        status: event.status,
        error: event.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use facteur_comms::{ActionType, Document, DocumentKind, DocumentStatus};
    use facteur_core::SocietyId;
    use facteur_mailer::{InMemoryGateway, InMemorySenderConfigs, SenderConfig};

    use crate::store::InMemoryDocumentStore;

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        gateway: Arc<InMemoryGateway>,
        sender: DeferredSender,
        document_id: DocumentId,
    }

    fn fixture(grace: Duration) -> Fixture {
        let society = SocietyId::new();
        let document = Document::new(society, DocumentKind::Invoice, "F-2024-001");
        let document_id = document.id;

        let store = InMemoryDocumentStore::arc();
        store.insert_document(document).unwrap();

        let gateway = Arc::new(InMemoryGateway::new());
        let configs = Arc::new(InMemorySenderConfigs::new());
        configs.insert(
            society,
            SenderConfig::smtp("smtp.example.com", 587, "user", "pass", "billing@acme.fr"),
        );

        let sender = DeferredSender::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&gateway) as Arc<dyn DeliveryGateway>,
            configs,
        )
        .with_grace(grace);

        Fixture {
            store,
            gateway,
            sender,
            document_id,
        }
    }

    fn draft() -> EmailDraft {
        EmailDraft::new("client@example.com", "Invoice F-2024-001", "Attached.")
    }

    #[tokio::test(start_paused = true)]
    async fn uncancelled_send_appends_one_sent_event_and_updates_status() {
        let fx = fixture(Duration::from_secs(4));
        let pending = fx.sender.send(fx.document_id, draft(), false).await.unwrap();

        let outcome = pending.outcome().await.expect("send should complete");
        assert_eq!(outcome.status, DeliveryStatus::Sent);
        assert_eq!(fx.gateway.sent_count(), 1);

        let document = fx.store.get(fx.document_id).await.unwrap().unwrap();
        assert_eq!(document.status, DocumentStatus::Sent);
        assert_eq!(document.log.len(), 1);
        assert_eq!(document.log.events()[0].action_type, ActionType::Send);
        assert_eq!(document.log.events()[0].status, DeliveryStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire_appends_nothing_and_returns_draft() {
        let fx = fixture(Duration::from_secs(4));
        let original = draft();
        let pending = fx
            .sender
            .send(fx.document_id, original.clone(), false)
            .await
            .unwrap();

        // "Cancelled at 2 seconds."
        tokio::time::sleep(Duration::from_secs(2)).await;
        let returned = pending.cancel().expect("timer had not fired");
        assert_eq!(returned, original);

        // Let the would-be fire time pass, then give the task a chance.
        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        assert_eq!(fx.gateway.sent_count(), 0);
        let document = fx.store.get(fx.document_id).await.unwrap().unwrap();
        assert!(document.log.is_empty());
        assert_eq!(document.status, DocumentStatus::Draft);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_abandons_the_send() {
        let fx = fixture(Duration::from_millis(10));
        let pending = fx.sender.send(fx.document_id, draft(), false).await.unwrap();
        drop(pending);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;

        assert_eq!(fx.gateway.sent_count(), 0);
        let document = fx.store.get(fx.document_id).await.unwrap().unwrap();
        assert!(document.log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_a_no_op() {
        let fx = fixture(Duration::from_millis(10));
        let pending = fx.sender.send(fx.document_id, draft(), false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;

        assert!(pending.cancel().is_none());
        assert_eq!(fx.gateway.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_failure_is_recorded_not_retried() {
        let fx = fixture(Duration::from_millis(10));
        fx.gateway.fail_with("invalid recipient");

        let pending = fx.sender.send(fx.document_id, draft(), false).await.unwrap();
        let outcome = pending.outcome().await.expect("send should complete");

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("delivery failed: invalid recipient"));

        let document = fx.store.get(fx.document_id).await.unwrap().unwrap();
        assert_eq!(document.log.len(), 1);
        assert_eq!(document.log.events()[0].status, DeliveryStatus::Failed);
        // Failures never move the document out of draft.
        assert_eq!(document.status, DocumentStatus::Draft);
    }

    #[tokio::test(start_paused = true)]
    async fn resend_after_delivered_send_is_classified_as_reminder() {
        let fx = fixture(Duration::from_millis(10));

        let first = fx.sender.send(fx.document_id, draft(), false).await.unwrap();
        first.outcome().await.expect("first send");

        let second = fx.sender.send(fx.document_id, draft(), false).await.unwrap();
        second.outcome().await.expect("second send");

        let document = fx.store.get(fx.document_id).await.unwrap().unwrap();
        let mut actions: Vec<ActionType> = document
            .log
            .events()
            .iter()
            .map(|e| e.action_type)
            .collect();
        actions.sort_by_key(|a| *a as u8);
        assert_eq!(actions, vec![ActionType::Send, ActionType::Reminder]);
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_before_any_event_exists() {
        let fx = fixture(Duration::from_millis(10));
        let result = fx
            .sender
            .send(fx.document_id, EmailDraft::new("", "s", "m"), false)
            .await;
        assert!(matches!(
            result,
            Err(SendError::Domain(DomainError::Validation(_)))
        ));

        let document = fx.store.get(fx.document_id).await.unwrap().unwrap();
        assert!(document.log.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_sender_config_is_rejected_up_front() {
        let society = SocietyId::new();
        let document = Document::new(society, DocumentKind::Quote, "D-2024-001");
        let document_id = document.id;
        let store = InMemoryDocumentStore::arc();
        store.insert_document(document).unwrap();

        let sender = DeferredSender::new(
            store as Arc<dyn DocumentStore>,
            Arc::new(InMemoryGateway::new()),
            Arc::new(InMemorySenderConfigs::new()),
        );

        assert!(matches!(
            sender.send(document_id, draft(), false).await,
            Err(SendError::Mailer(_))
        ));
    }
}
