//! The owning business document (consumed entity, not managed here).

use serde::{Deserialize, Serialize};

use facteur_core::{DocumentId, SocietyId};

use crate::log::CommunicationLog;

/// Document type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Invoice,
    Quote,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::Quote => "quote",
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for DocumentKind {
    type Err = facteur_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice" => Ok(DocumentKind::Invoice),
            "quote" => Ok(DocumentKind::Quote),
            other => Err(facteur_core::DomainError::serialization(format!(
                "unknown document kind: {other}"
            ))),
        }
    }
}

/// Document lifecycle status, covering both invoice and quote lifecycles.
///
/// `Paid`/`Overdue` only occur on invoices, `Accepted`/`Refused` only on
/// quotes; the communication subsystem never produces those. It only moves
/// pre-send documents to `Sent` (see [`crate::status::resolve_status`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    /// PDF generated locally but never emailed.
    Downloaded,
    Sent,
    Paid,
    Accepted,
    Overdue,
    Refused,
    Cancelled,
    Archived,
    Deleted,
}

impl DocumentStatus {
    /// Statuses the send transition fires from. Membership here is what makes
    /// the transition monotonic: once past this set the resolver never fires
    /// again.
    pub fn is_pre_send(&self) -> bool {
        matches!(self, DocumentStatus::Draft | DocumentStatus::Downloaded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Downloaded => "downloaded",
            DocumentStatus::Sent => "sent",
            DocumentStatus::Paid => "paid",
            DocumentStatus::Accepted => "accepted",
            DocumentStatus::Overdue => "overdue",
            DocumentStatus::Refused => "refused",
            DocumentStatus::Cancelled => "cancelled",
            DocumentStatus::Archived => "archived",
            DocumentStatus::Deleted => "deleted",
        }
    }
}

impl core::str::FromStr for DocumentStatus {
    type Err = facteur_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "downloaded" => Ok(DocumentStatus::Downloaded),
            "sent" => Ok(DocumentStatus::Sent),
            "paid" => Ok(DocumentStatus::Paid),
            "accepted" => Ok(DocumentStatus::Accepted),
            "overdue" => Ok(DocumentStatus::Overdue),
            "refused" => Ok(DocumentStatus::Refused),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            "archived" => Ok(DocumentStatus::Archived),
            "deleted" => Ok(DocumentStatus::Deleted),
            other => Err(facteur_core::DomainError::serialization(format!(
                "unknown document status: {other}"
            ))),
        }
    }
}

/// An invoice or quote together with its communication log.
///
/// Document persistence and the rest of the document lifecycle live outside
/// this subsystem; this is the slice the communication paths read and write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub society_id: SocietyId,
    pub kind: DocumentKind,
    /// Display number, e.g. "F-2024-001".
    pub number: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub log: CommunicationLog,
}

impl Document {
    pub fn new(
        society_id: SocietyId,
        kind: DocumentKind,
        number: impl Into<String>,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            society_id,
            kind,
            number: number.into(),
            status: DocumentStatus::Draft,
            log: CommunicationLog::new(),
        }
    }

    /// Whether the reconciliation worker may touch this document.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.status,
            DocumentStatus::Archived | DocumentStatus::Deleted
        )
    }
}
