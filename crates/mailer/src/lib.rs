//! `facteur-mailer`: the delivery boundary.
//!
//! Actual socket-level transmission (SMTP sessions, OAuth token exchange) is
//! an external collaborator; this crate owns the seam: the
//! [`DeliveryGateway`] trait, the per-society [`SenderConfig`] and its
//! resolution, and an in-memory gateway for tests and development.

pub mod config;
pub mod error;
pub mod gateway;

pub use config::{InMemorySenderConfigs, MailProvider, SenderConfig, SenderConfigResolver};
pub use error::MailerError;
pub use gateway::{DeliveryGateway, DeliveryReceipt, InMemoryGateway, OutboundMessage};
