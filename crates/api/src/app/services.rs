use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use facteur_comms::{Document, DocumentStatus, EmailDraft, SendEvent};
use facteur_core::{DocumentId, DomainError, SendEventId};
use facteur_infra::{
    DeferredSender, DocumentStore, InMemoryDocumentStore, PassReport, PendingSend,
    PostgresDocumentStore, Reconciler, ScheduledSender, SendError, StoreError,
};
use facteur_mailer::{DeliveryGateway, InMemoryGateway, SenderConfigResolver};

/// One slot in the pending-send registry. `Reserved` holds the document's
/// slot from the conflict check until the grace window actually exists, so
/// two overlapping requests cannot both start a send.
enum PendingSlot {
    Reserved,
    Active(PendingSend),
}

/// Everything the handlers need: the store, the three send paths, and the
/// registry of in-flight grace windows.
///
/// Pending sends are keyed by document; one grace window per document at a
/// time, which is also what the composing client can show.
pub struct AppServices {
    store: Arc<dyn DocumentStore>,
    deferred: DeferredSender,
    scheduler: ScheduledSender,
    reconciler: Reconciler,
    grace: Duration,
    pending: Mutex<HashMap<DocumentId, PendingSlot>>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn DeliveryGateway>,
        configs: Arc<dyn SenderConfigResolver>,
        grace: Duration,
    ) -> Self {
        Self {
            deferred: DeferredSender::new(
                Arc::clone(&store),
                Arc::clone(&gateway),
                Arc::clone(&configs),
            )
            .with_grace(grace),
            scheduler: ScheduledSender::new(Arc::clone(&store), Arc::clone(&configs)),
            reconciler: Reconciler::new(Arc::clone(&store), gateway, configs),
            store,
            grace,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        self.store.get(id).await
    }

    /// Start an immediate send and register its grace window.
    ///
    /// Rejected with a conflict while an earlier window for the same document
    /// is still open. The slot is reserved before any await, so overlapping
    /// requests for one document cannot both start a send.
    pub async fn start_send(
        &self,
        document_id: DocumentId,
        draft: EmailDraft,
        is_resend: bool,
    ) -> Result<(), SendError> {
        {
            let mut pending = self.pending.lock().unwrap();
            match pending.entry(document_id) {
                Entry::Occupied(mut slot) => match slot.get() {
                    PendingSlot::Reserved => {
                        return Err(DomainError::conflict(
                            "a send is already pending for this document",
                        )
                        .into());
                    }
                    PendingSlot::Active(handle) if !handle.fired() => {
                        return Err(DomainError::conflict(
                            "a send is already pending for this document",
                        )
                        .into());
                    }
                    _ => {
                        slot.insert(PendingSlot::Reserved);
                    }
                },
                Entry::Vacant(slot) => {
                    slot.insert(PendingSlot::Reserved);
                }
            }
        }

        match self.deferred.send(document_id, draft, is_resend).await {
            Ok(handle) => {
                self.pending
                    .lock()
                    .unwrap()
                    .insert(document_id, PendingSlot::Active(handle));
                Ok(())
            }
            Err(err) => {
                // Give the slot back; nothing was started.
                self.pending.lock().unwrap().remove(&document_id);
                Err(err)
            }
        }
    }

    /// Cancel the document's pending send.
    ///
    /// `Ok(Some(draft))` when the window was still open, `Ok(None)` when it
    /// had already fired, `Err` when nothing was pending at all (not found)
    /// or the send is still being validated (conflict).
    pub fn cancel_send(&self, document_id: DocumentId) -> Result<Option<EmailDraft>, DomainError> {
        let mut pending = self.pending.lock().unwrap();
        match pending.remove(&document_id) {
            None => Err(DomainError::NotFound),
            Some(PendingSlot::Reserved) => {
                pending.insert(document_id, PendingSlot::Reserved);
                Err(DomainError::conflict("the send is still being prepared"))
            }
            Some(PendingSlot::Active(handle)) => Ok(handle.cancel()),
        }
    }

    /// Record a local PDF download in the document's history.
    ///
    /// Appends a terminal `download` entry; a draft document moves to
    /// `downloaded`, any other status is left alone.
    pub async fn record_download(
        &self,
        document_id: DocumentId,
    ) -> Result<SendEventId, SendError> {
        let document = self
            .store
            .get(document_id)
            .await?
            .ok_or(DomainError::NotFound)?;

        let event = SendEvent::download_record(document_id, Utc::now());
        let new_status =
            (document.status == DocumentStatus::Draft).then_some(DocumentStatus::Downloaded);
        self.store.append_event(document_id, &event, new_status).await?;
        Ok(event.id)
    }

    pub async fn schedule_send(
        &self,
        document_id: DocumentId,
        draft: EmailDraft,
        scheduled_at: DateTime<Utc>,
        is_resend: bool,
    ) -> Result<SendEventId, SendError> {
        self.scheduler
            .schedule(document_id, draft, scheduled_at, is_resend)
            .await
    }

    /// One reconciliation pass; invoked by the cron route (external scheduler
    /// or a manual trigger, same entrypoint either way).
    pub async fn process_scheduled(&self) -> Result<PassReport, StoreError> {
        self.reconciler.run_pass().await
    }
}

/// Wire services from the environment: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise (dev/test).
pub async fn build_services() -> AppServices {
    let grace = grace_from_env();

    // The SMTP/OAuth transport is deployed as a sidecar in production; the
    // recording gateway keeps dev and test runs self-contained.
    let gateway: Arc<dyn DeliveryGateway> = Arc::new(InMemoryGateway::new());
    let configs: Arc<dyn SenderConfigResolver> =
        Arc::new(facteur_mailer::InMemorySenderConfigs::new());

    let store: Arc<dyn DocumentStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = sqlx::PgPool::connect(&database_url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresDocumentStore::new(pool);
            store
                .ensure_schema()
                .await
                .expect("failed to ensure database schema");
            Arc::new(store)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using in-memory document store");
            InMemoryDocumentStore::arc()
        }
    };

    AppServices::new(store, gateway, configs, grace)
}

fn grace_from_env() -> Duration {
    std::env::var("SEND_GRACE_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(facteur_infra::undo::DEFAULT_GRACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Notify};

    use facteur_comms::DocumentKind;
    use facteur_core::SocietyId;
    use facteur_mailer::{InMemoryGateway, InMemorySenderConfigs, SenderConfig};

    /// Store whose `get` parks until released, so a test can hold a send
    /// mid-validation while issuing other calls.
    struct GatedStore {
        inner: Arc<InMemoryDocumentStore>,
        entered: mpsc::UnboundedSender<()>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl DocumentStore for GatedStore {
        async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
            let _ = self.entered.send(());
            self.release.notified().await;
            self.inner.get(id).await
        }

        async fn find_with_scheduled(&self) -> Result<Vec<Document>, StoreError> {
            self.inner.find_with_scheduled().await
        }

        async fn append_event(
            &self,
            document_id: DocumentId,
            event: &SendEvent,
            new_status: Option<DocumentStatus>,
        ) -> Result<(), StoreError> {
            self.inner.append_event(document_id, event, new_status).await
        }

        async fn close_out(
            &self,
            document_id: DocumentId,
            events: &[SendEvent],
            new_status: Option<DocumentStatus>,
        ) -> Result<(), StoreError> {
            self.inner.close_out(document_id, events, new_status).await
        }
    }

    fn seeded() -> (Arc<InMemoryDocumentStore>, Arc<InMemorySenderConfigs>, DocumentId) {
        let society = SocietyId::new();
        let document = Document::new(society, DocumentKind::Invoice, "F-2024-001");
        let document_id = document.id;
        let store = InMemoryDocumentStore::arc();
        store.insert_document(document).unwrap();
        let configs = Arc::new(InMemorySenderConfigs::new());
        configs.insert(
            society,
            SenderConfig::smtp("smtp.example.com", 587, "user", "pass", "billing@acme.fr"),
        );
        (store, configs, document_id)
    }

    fn draft() -> EmailDraft {
        EmailDraft::new("client@example.com", "Invoice", "Attached.")
    }

    #[tokio::test]
    async fn overlapping_sends_for_one_document_conflict() {
        let (inner, configs, document_id) = seeded();
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let store = Arc::new(GatedStore {
            inner,
            entered: entered_tx,
            release: Arc::clone(&release),
        });

        let services = Arc::new(AppServices::new(
            store,
            Arc::new(InMemoryGateway::new()),
            configs,
            Duration::from_secs(60),
        ));

        let first = {
            let services = Arc::clone(&services);
            tokio::spawn(async move { services.start_send(document_id, draft(), false).await })
        };
        // The first request is parked inside the store, slot reserved.
        entered_rx.recv().await.unwrap();

        let err = services
            .start_send(document_id, draft(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Domain(DomainError::Conflict(_))
        ));
        assert!(matches!(
            services.cancel_send(document_id),
            Err(DomainError::Conflict(_))
        ));

        release.notify_one();
        first.await.unwrap().unwrap();

        // The reserved slot became the active window; cancel still wins it.
        let cancelled = services.cancel_send(document_id).unwrap();
        assert!(cancelled.is_some());
    }

    #[tokio::test]
    async fn rejected_send_releases_the_slot() {
        let (store, configs, document_id) = seeded();
        let services = AppServices::new(
            store,
            Arc::new(InMemoryGateway::new()),
            configs,
            Duration::from_secs(60),
        );

        let err = services
            .start_send(document_id, EmailDraft::new("", "s", "m"), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Domain(DomainError::Validation(_))
        ));

        // The slot is free again.
        services
            .start_send(document_id, draft(), false)
            .await
            .unwrap();
        assert!(services.cancel_send(document_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn download_record_marks_draft_documents_only() {
        let (store, configs, document_id) = seeded();
        let services = AppServices::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(InMemoryGateway::new()),
            configs,
            Duration::from_secs(60),
        );

        services.record_download(document_id).await.unwrap();
        let document = store.get(document_id).await.unwrap().unwrap();
        assert_eq!(document.status, DocumentStatus::Downloaded);
        assert_eq!(document.log.len(), 1);

        // A second download appends another entry and leaves the status alone.
        services.record_download(document_id).await.unwrap();
        let document = store.get(document_id).await.unwrap().unwrap();
        assert_eq!(document.status, DocumentStatus::Downloaded);
        assert_eq!(document.log.len(), 2);
    }
}
