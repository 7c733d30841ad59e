use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::document::DocumentId;
use crate::domain::identity::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn generate() -> Self {
        Self(format!("NTF-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    /// An approval that leaves later steps pending.
    StepApproved,
    DocumentApproved,
    DocumentRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepApproved => "step-approved",
            Self::DocumentApproved => "document-approved",
            Self::DocumentRejected => "document-rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "step-approved" => Some(Self::StepApproved),
            "document-approved" => Some(Self::DocumentApproved),
            "document-rejected" => Some(Self::DocumentRejected),
            _ => None,
        }
    }
}

/// Event handed to the notifier; the sink assigns identity and timestamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub message: String,
    pub document_id: DocumentId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub message: String,
    pub document_id: DocumentId,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn record(event: NewNotification, created_at: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient: event.recipient,
            kind: event.kind,
            message: event.message,
            document_id: event.document_id,
            read: false,
            created_at,
        }
    }
}
