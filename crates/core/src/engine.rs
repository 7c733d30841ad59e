use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use crate::chain::{
    actionable_steps, build_chain, plan_decision, plan_revision, validate_approvers,
    validate_draft, ActionableStep, ChainSnapshot, VersionWalk,
};
use crate::config::WorkflowConfig;
use crate::domain::approval::{ApprovalStep, Decision};
use crate::domain::document::{Document, DocumentDraft, DocumentId, DocumentStatus};
use crate::domain::identity::UserId;
use crate::domain::notification::Notification;
use crate::errors::WorkflowError;
use crate::store::ChainStore;

/// Committed effect of a decision, including the notification the initiator received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDecision {
    pub document: Document,
    pub step: ApprovalStep,
    pub notification: Notification,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDetails {
    pub document: Document,
    pub steps: Vec<ApprovalStep>,
    pub current_step: Option<ApprovalStep>,
}

impl From<ChainSnapshot> for DocumentDetails {
    /// A resolved document has no current step even when later steps stay pending.
    fn from(snapshot: ChainSnapshot) -> Self {
        let current_step = match snapshot.document.status {
            DocumentStatus::Pending => snapshot.current_step().cloned(),
            _ => None,
        };
        Self { document: snapshot.document, steps: snapshot.steps, current_step }
    }
}

pub struct ApprovalChainEngine<S: ?Sized> {
    store: Arc<S>,
    workflow: WorkflowConfig,
    audit: Arc<dyn AuditSink>,
}

impl<S> Clone for ApprovalChainEngine<S>
where
    S: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            workflow: self.workflow.clone(),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S> ApprovalChainEngine<S>
where
    S: ChainStore + ?Sized,
{
    pub fn new(store: Arc<S>, workflow: WorkflowConfig) -> Self {
        Self { store, workflow, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn workflow(&self) -> &WorkflowConfig {
        &self.workflow
    }

    pub async fn create_document(
        &self,
        initiator: &UserId,
        draft: DocumentDraft,
        approvers: &[UserId],
        audit: &AuditContext,
    ) -> Result<ChainSnapshot, WorkflowError> {
        let result = self.try_create_document(initiator, draft, approvers).await;
        match &result {
            Ok(chain) => self.audit.emit(
                AuditEvent::new(
                    Some(chain.document.id.clone()),
                    audit,
                    "document.submitted",
                    AuditCategory::Submission,
                    AuditOutcome::Success,
                )
                .with_metadata("approvers", chain.steps.len().to_string())
                .with_metadata("document_type", chain.document.document_type.as_str()),
            ),
            Err(error) => self.audit.emit(refusal(
                None,
                audit,
                "document.submission_refused",
                AuditCategory::Submission,
                error,
            )),
        }
        result
    }

    async fn try_create_document(
        &self,
        initiator: &UserId,
        draft: DocumentDraft,
        approvers: &[UserId],
    ) -> Result<ChainSnapshot, WorkflowError> {
        validate_draft(&draft)?;
        validate_approvers(approvers, self.workflow.max_approvers)?;

        let chain =
            build_chain(DocumentId::generate(), initiator.clone(), draft, approvers, Utc::now());
        self.store.insert_chain(chain.clone()).await?;
        Ok(chain)
    }

    /// Validates and applies one approver's decision. Validation runs against the chain as
    /// locked by the store, so two racing decisions can never both pass the turn check.
    pub async fn submit_decision(
        &self,
        document_id: &DocumentId,
        approver: &UserId,
        decision: Decision,
        audit: &AuditContext,
    ) -> Result<AppliedDecision, WorkflowError> {
        let deciding = approver.clone();
        let result = self
            .store
            .apply_decision(
                document_id,
                Box::new(move |snapshot: &ChainSnapshot| {
                    snapshot.check_integrity()?;
                    plan_decision(snapshot, &deciding, decision, Utc::now())
                }),
            )
            .await;

        match result {
            Ok((outcome, notification)) => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(document_id.clone()),
                        audit,
                        "decision.applied",
                        AuditCategory::Decision,
                        AuditOutcome::Success,
                    )
                    .with_metadata("decision", decision.as_str())
                    .with_metadata("sequence", outcome.step.sequence.to_string())
                    .with_metadata("document_status", outcome.document.status.as_str())
                    .with_metadata("notification_id", notification.id.0.clone()),
                );
                Ok(AppliedDecision { document: outcome.document, step: outcome.step, notification })
            }
            Err(error) => {
                self.audit.emit(
                    refusal(
                        Some(document_id.clone()),
                        audit,
                        "decision.refused",
                        AuditCategory::Decision,
                        &error,
                    )
                    .with_metadata("decision", decision.as_str()),
                );
                Err(error)
            }
        }
    }

    /// Advisory listing; `submit_decision` re-validates turn order regardless of these flags.
    pub async fn list_actionable_for(
        &self,
        approver: &UserId,
    ) -> Result<Vec<ActionableStep>, WorkflowError> {
        let chains = self.store.chains_for_approver(approver).await?;
        Ok(actionable_steps(&chains, approver))
    }

    pub async fn revise_rejected(
        &self,
        source_id: &DocumentId,
        requester: &UserId,
        audit: &AuditContext,
    ) -> Result<ChainSnapshot, WorkflowError> {
        let requester_id = requester.clone();
        let result = self
            .store
            .insert_revision(
                source_id,
                Box::new(move |source: &ChainSnapshot, existing: Option<&DocumentId>| {
                    source.check_integrity()?;
                    plan_revision(
                        source,
                        existing,
                        &requester_id,
                        DocumentId::generate(),
                        Utc::now(),
                    )
                }),
            )
            .await;

        match &result {
            Ok(revision) => self.audit.emit(
                AuditEvent::new(
                    Some(revision.document.id.clone()),
                    audit,
                    "document.revised",
                    AuditCategory::Revision,
                    AuditOutcome::Success,
                )
                .with_metadata("previous_version_id", source_id.0.clone())
                .with_metadata("version", revision.document.version.to_string()),
            ),
            Err(error) => self.audit.emit(refusal(
                Some(source_id.clone()),
                audit,
                "document.revision_refused",
                AuditCategory::Revision,
                error,
            )),
        }
        result
    }

    /// Version history of `document_id`, oldest first.
    pub async fn get_version_chain(
        &self,
        document_id: &DocumentId,
        audit: &AuditContext,
    ) -> Result<Vec<Document>, WorkflowError> {
        let result = self.walk_versions(document_id).await;
        if let Err(error @ WorkflowError::InvariantViolation(_)) = &result {
            self.audit.emit(refusal(
                Some(document_id.clone()),
                audit,
                "version_chain.corrupted",
                AuditCategory::System,
                error,
            ));
        }
        result
    }

    async fn walk_versions(&self, document_id: &DocumentId) -> Result<Vec<Document>, WorkflowError> {
        let start = self
            .store
            .find_document(document_id)
            .await?
            .ok_or_else(|| WorkflowError::document_not_found(document_id.0.clone()))?;

        let mut walk = VersionWalk::new(self.workflow.max_version_depth);
        let mut next = walk.visit(start)?;
        while let Some(previous_id) = next {
            let Some(previous) = self.store.find_document(&previous_id).await? else {
                let from = walk.last_visited().map(|id| id.0.clone()).unwrap_or_default();
                return Err(WorkflowError::InvariantViolation(format!(
                    "document {from} links to missing version {}",
                    previous_id.0
                )));
            };
            next = walk.visit(previous)?;
        }

        Ok(walk.into_oldest_first())
    }

    pub async fn get_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentDetails, WorkflowError> {
        let chain = self
            .store
            .load_chain(document_id)
            .await?
            .ok_or_else(|| WorkflowError::document_not_found(document_id.0.clone()))?;
        chain.check_integrity()?;
        Ok(chain.into())
    }

    pub async fn list_documents_for_initiator(
        &self,
        initiator: &UserId,
    ) -> Result<Vec<Document>, WorkflowError> {
        self.store.documents_for_initiator(initiator).await
    }
}

fn refusal(
    document_id: Option<DocumentId>,
    audit: &AuditContext,
    event_type: &str,
    category: AuditCategory,
    error: &WorkflowError,
) -> AuditEvent {
    let outcome = match error {
        WorkflowError::Persistence(_) | WorkflowError::InvariantViolation(_) => {
            AuditOutcome::Failed
        }
        _ => AuditOutcome::Rejected,
    };
    let event = AuditEvent::new(document_id, audit, event_type, category, outcome)
        .with_metadata("error_kind", error.kind())
        .with_metadata("error", error.to_string());
    match error {
        WorkflowError::Forbidden(reason) => event.with_metadata("reason", reason.code()),
        WorkflowError::InvalidState(reason) => event.with_metadata("reason", reason.code()),
        _ => event,
    }
}
