//! Storage ports implemented by `capflow-db`.
//!
//! Validation runs inside the store's critical section: the store locks the document, loads
//! its chain, calls the supplied planner, and persists the plan in the same atomic unit.
//! A planner error leaves storage untouched.

use async_trait::async_trait;

use crate::chain::{ChainSnapshot, DecisionOutcome};
use crate::domain::document::{Document, DocumentId};
use crate::domain::identity::UserId;
use crate::domain::notification::{NewNotification, Notification, NotificationId};
use crate::errors::WorkflowError;

pub type DecisionPlanner =
    Box<dyn FnOnce(&ChainSnapshot) -> Result<DecisionOutcome, WorkflowError> + Send>;

/// Receives the locked source chain and the id of its existing revision, if any.
pub type RevisionPlanner = Box<
    dyn FnOnce(&ChainSnapshot, Option<&DocumentId>) -> Result<ChainSnapshot, WorkflowError>
        + Send,
>;

#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Inserts a brand-new document and all of its steps atomically.
    async fn insert_chain(&self, chain: ChainSnapshot) -> Result<(), WorkflowError>;

    async fn find_document(&self, id: &DocumentId) -> Result<Option<Document>, WorkflowError>;

    async fn load_chain(&self, id: &DocumentId) -> Result<Option<ChainSnapshot>, WorkflowError>;

    /// Every chain containing a step assigned to `approver`, newest document first.
    async fn chains_for_approver(
        &self,
        approver: &UserId,
    ) -> Result<Vec<ChainSnapshot>, WorkflowError>;

    async fn documents_for_initiator(
        &self,
        initiator: &UserId,
    ) -> Result<Vec<Document>, WorkflowError>;

    /// Applies a decision planned against the locked chain: the updated step, the updated
    /// document and the notification commit together or not at all.
    async fn apply_decision(
        &self,
        id: &DocumentId,
        planner: DecisionPlanner,
    ) -> Result<(DecisionOutcome, Notification), WorkflowError>;

    /// Inserts the revision planned from the locked source chain. A source has at most one
    /// revision; the planner sees the existing one so it can refuse a second.
    async fn insert_revision(
        &self,
        source_id: &DocumentId,
        planner: RevisionPlanner,
    ) -> Result<ChainSnapshot, WorkflowError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn record(&self, event: NewNotification) -> Result<Notification, WorkflowError>;

    /// Newest first.
    async fn list_for_recipient(
        &self,
        recipient: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, WorkflowError>;

    async fn mark_read(
        &self,
        id: &NotificationId,
        recipient: &UserId,
    ) -> Result<Notification, WorkflowError>;

    async fn unread_count(&self, recipient: &UserId) -> Result<u64, WorkflowError>;
}
