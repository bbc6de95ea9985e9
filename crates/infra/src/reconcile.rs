//! The reconciliation pass that delivers due scheduled sends.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use facteur_comms::{resolve_status, DeliveryStatus, SendEvent};
use facteur_mailer::{DeliveryGateway, OutboundMessage, SenderConfigResolver};

use crate::store::{DocumentStore, StoreError};

/// Outcome summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PassReport {
    /// Due events closed out this pass, both delivered and failed.
    pub processed: usize,
    /// The subset that closed out as failed.
    pub errors: usize,
    /// Human-readable per-event lines for the invoking operator.
    pub details: Vec<String>,
}

/// Scans for documents holding due scheduled events and delivers them.
///
/// Every due event leaves the pass terminal: delivered sends become `sent`,
/// anything that could not go out becomes `failed` with the diagnostic on the
/// event. A pass is idempotent; terminal events are never picked up again.
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn DeliveryGateway>,
    configs: Arc<dyn SenderConfigResolver>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn DeliveryGateway>,
        configs: Arc<dyn SenderConfigResolver>,
    ) -> Self {
        Self {
            store,
            gateway,
            configs,
        }
    }

    /// Run one pass against the current clock.
    pub async fn run_pass(&self) -> Result<PassReport, StoreError> {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass as of `now`. An event is due when `scheduled_at <= now`.
    #[instrument(skip(self))]
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<PassReport, StoreError> {
        let mut report = PassReport::default();

        for document in self.store.find_with_scheduled().await? {
            if !document.is_active() {
                continue;
            }
            let due_ids = document.log.due_event_ids(now);
            if due_ids.is_empty() {
                continue;
            }

            // One resolution per document; a broken configuration fails every
            // due event of that document with the same diagnostic.
            let config = self.configs.resolve(document.society_id);

            let mut closed: Vec<SendEvent> = Vec::with_capacity(due_ids.len());
            for id in due_ids {
                let Some(event) = document.log.get(id) else {
                    continue;
                };
                let mut event = event.clone();

                let delivery = match &config {
                    Ok(config) => {
                        let message = OutboundMessage::from_event(&event);
                        self.gateway.send(&message, config).await
                    }
                    Err(err) => Err(err.clone()),
                };

                let close = match delivery {
                    Ok(receipt) => event.mark_sent(receipt.message_id),
                    Err(err) => event.mark_failed(err.to_string()),
                };
                if close.is_err() {
                    // Already terminal; nothing to close out.
                    continue;
                }

                match event.status {
                    DeliveryStatus::Failed => {
                        report.errors += 1;
                        report.details.push(format!(
                            "document {}: event {} failed: {}",
                            document.number,
                            event.id,
                            event.error.as_deref().unwrap_or("unknown error")
                        ));
                    }
                    _ => {
                        report.details.push(format!(
                            "document {}: event {} sent",
                            document.number, event.id
                        ));
                    }
                }
                closed.push(event);
            }

            if closed.is_empty() {
                continue;
            }

            // Derive the post-pass lifecycle status from the closed-out log.
            let mut log = document.log.clone();
            for event in &closed {
                if let Some(stored) = log.get_mut(event.id) {
                    *stored = event.clone();
                }
            }
            let new_status = resolve_status(document.status, &log);

            // One store write per document per pass.
            match self.store.close_out(document.id, &closed, new_status).await {
                Ok(()) => report.processed += closed.len(),
                Err(err) => {
                    warn!(
                        document_id = %document.id,
                        error = %err,
                        "failed to persist pass results for document"
                    );
                    report
                        .details
                        .push(format!("document {}: persistence failed: {err}", document.number));
                }
            }
        }

        info!(
            processed = report.processed,
            errors = report.errors,
            "reconciliation pass complete"
        );
        Ok(report)
    }
}
