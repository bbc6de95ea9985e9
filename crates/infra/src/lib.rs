//! `facteur-infra`: delivery orchestration and durable storage.
//!
//! Three paths create or resolve send events:
//! - [`undo::DeferredSender`]: immediate send behind a short cancellable
//!   grace window,
//! - [`schedule::ScheduledSender`]: durable future-dated sends,
//! - [`reconcile::Reconciler`]: the periodic pass that executes whatever has
//!   come due.
//!
//! All three go through the [`store::DocumentStore`] seam; the Postgres
//! implementation keeps one row per send event so concurrent writers never
//! read-modify-write a shared log blob.

pub mod error;
pub mod reconcile;
pub mod schedule;
pub mod store;
pub mod undo;

pub use error::SendError;
pub use reconcile::{PassReport, Reconciler};
pub use schedule::ScheduledSender;
pub use store::{DocumentStore, InMemoryDocumentStore, PostgresDocumentStore, StoreError};
pub use undo::{DeferredSender, PendingSend, SendOutcome};
