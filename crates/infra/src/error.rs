use thiserror::Error;

use facteur_core::DomainError;
use facteur_mailer::MailerError;

use crate::store::StoreError;

/// Error surfaced synchronously when initiating a send or schedule.
///
/// Everything here is raised *before* any event is created; once an event
/// exists, failures are recorded on the event instead of propagated.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Mailer(#[from] MailerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
