pub mod audit;
pub mod chain;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod store;

pub use audit::{AuditContext, AuditEvent, AuditSink};
pub use chain::{ActionableStep, ChainSnapshot, DecisionOutcome};
pub use domain::approval::{ApprovalStep, ApprovalStepId, Decision, StepStatus};
pub use domain::document::{
    AttachmentRef, Document, DocumentDraft, DocumentId, DocumentStatus, DocumentType,
};
pub use domain::identity::{Identity, Role, UserId};
pub use domain::notification::{NewNotification, Notification, NotificationId, NotificationKind};
pub use engine::{AppliedDecision, ApprovalChainEngine, DocumentDetails};
pub use errors::{DomainError, InterfaceError, WorkflowError};
pub use store::{ChainStore, NotificationStore};

pub use chrono;
pub use rust_decimal;
