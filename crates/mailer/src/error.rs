use thiserror::Error;

/// Errors at the delivery boundary.
#[derive(Debug, Clone, Error)]
pub enum MailerError {
    /// No usable sender configuration for the society.
    #[error("sender configuration missing or incomplete: {0}")]
    NotConfigured(String),

    /// Transport or authentication failure reported by the gateway.
    ///
    /// Recorded on the send event; never retried.
    #[error("delivery failed: {0}")]
    Delivery(String),
}
