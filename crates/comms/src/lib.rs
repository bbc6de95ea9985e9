//! `facteur-comms`: the communication log domain.
//!
//! A [`Document`](document::Document) (invoice or quote) owns one
//! [`CommunicationLog`](log::CommunicationLog): an append-mostly list of
//! [`SendEvent`](event::SendEvent)s, the single source of truth for what was
//! sent (or scheduled) to whom and when. Everything display-facing (ordering,
//! reminder numbering, status badges) is derived from the log, never stored.

pub mod document;
pub mod draft;
pub mod event;
pub mod log;
pub mod status;

pub use document::{Document, DocumentKind, DocumentStatus};
pub use draft::EmailDraft;
pub use event::{ActionType, Attachment, DeliveryStatus, SendEvent};
pub use log::{reminder_label, CommunicationLog};
pub use status::resolve_status;
