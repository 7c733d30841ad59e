use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::identity::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(format!("DOC-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Capex,
    Opex,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capex => "capex",
            Self::Opex => "opex",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "capex" => Some(Self::Capex),
            "opex" => Some(Self::Opex),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Reference to a file held by the attachment storage service. Bytes never pass through here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub storage_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Descriptive metadata supplied at submission and copied verbatim into revisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub document_type: DocumentType,
    #[serde(default)]
    pub attachment: Option<AttachmentRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub initiator: UserId,
    pub version: u32,
    pub previous_version_id: Option<DocumentId>,
    pub attachment: Option<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn submit(
        id: DocumentId,
        initiator: UserId,
        draft: DocumentDraft,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: draft.title,
            description: draft.description,
            amount: draft.amount,
            currency: draft.currency,
            document_type: draft.document_type,
            status: DocumentStatus::Pending,
            initiator,
            version: 1,
            previous_version_id: None,
            attachment: draft.attachment,
            created_at,
            completed_at: None,
        }
    }

    pub fn draft(&self) -> DocumentDraft {
        DocumentDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            document_type: self.document_type,
            attachment: self.attachment.clone(),
        }
    }

    /// New pending revision of this document linked back to it.
    pub fn revise(&self, id: DocumentId, created_at: DateTime<Utc>) -> Self {
        let mut revision = Self::submit(id, self.initiator.clone(), self.draft(), created_at);
        revision.version = self.version.saturating_add(1);
        revision.previous_version_id = Some(self.id.clone());
        revision
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self.status, next),
            (DocumentStatus::Pending, DocumentStatus::Approved)
                | (DocumentStatus::Pending, DocumentStatus::Rejected)
        )
    }

    pub fn resolve(&mut self, next: DocumentStatus, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidDocumentTransition { from: self.status, to: next });
        }

        self.status = next;
        self.completed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Document, DocumentDraft, DocumentId, DocumentStatus, DocumentType};
    use crate::domain::identity::UserId;
    use crate::errors::DomainError;

    fn document() -> Document {
        Document::submit(
            DocumentId("DOC-1".to_string()),
            UserId::new("u-initiator"),
            DocumentDraft {
                title: "Replace chiller".to_string(),
                description: "Plant 2 cooling".to_string(),
                amount: Decimal::new(1_250_000, 2),
                currency: "USD".to_string(),
                document_type: DocumentType::Capex,
                attachment: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn pending_document_resolves_once() {
        let mut document = document();
        document.resolve(DocumentStatus::Approved, Utc::now()).expect("pending -> approved");

        assert_eq!(document.status, DocumentStatus::Approved);
        assert!(document.completed_at.is_some());

        let error = document
            .resolve(DocumentStatus::Rejected, Utc::now())
            .expect_err("approved is terminal");
        assert!(matches!(error, DomainError::InvalidDocumentTransition { .. }));
    }

    #[test]
    fn pending_is_not_a_resolution_target() {
        let mut document = document();
        assert!(!document.can_transition_to(DocumentStatus::Pending));
        assert!(document.resolve(DocumentStatus::Pending, Utc::now()).is_err());
        assert_eq!(document.completed_at, None);
    }

    #[test]
    fn revision_copies_metadata_and_links_back() {
        let mut original = document();
        original.resolve(DocumentStatus::Rejected, Utc::now()).expect("reject");

        let revision = original.revise(DocumentId("DOC-2".to_string()), Utc::now());

        assert_eq!(revision.status, DocumentStatus::Pending);
        assert_eq!(revision.previous_version_id, Some(original.id.clone()));
        assert_eq!(revision.version, 2);
        assert_eq!(revision.completed_at, None);
        assert_eq!(revision.draft(), original.draft());
        assert_eq!(revision.initiator, original.initiator);
    }
}
