//! Approval chain rules.
//!
//! Everything here is deterministic and storage-free: stores load a [`ChainSnapshot`], hand it
//! to these functions under their per-document lock, and persist whatever comes back.
//! The current turn is never stored; it is always the pending step with the lowest sequence.

pub mod revision;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStep, Decision};
use crate::domain::document::{Document, DocumentDraft, DocumentId, DocumentStatus};
use crate::domain::identity::UserId;
use crate::domain::notification::{NewNotification, NotificationKind};
use crate::errors::{ForbiddenReason, InvalidStateReason, WorkflowError};

pub use revision::{plan_revision, VersionWalk};

/// A document together with its full step set, ordered by sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub document: Document,
    pub steps: Vec<ApprovalStep>,
}

impl ChainSnapshot {
    pub fn new(document: Document, mut steps: Vec<ApprovalStep>) -> Self {
        steps.sort_by_key(|step| step.sequence);
        Self { document, steps }
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.steps.iter().filter(|step| step.is_pending()).min_by_key(|step| step.sequence)
    }

    pub fn step_for(&self, approver: &UserId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| &step.approver == approver)
    }

    /// True only while the document is still open and `step` is the lowest pending one.
    pub fn is_current_turn(&self, step: &ApprovalStep) -> bool {
        self.document.status == DocumentStatus::Pending
            && self.current_step().is_some_and(|current| current.id == step.id)
    }

    pub fn pending_count(&self) -> usize {
        self.steps.iter().filter(|step| step.is_pending()).count()
    }

    pub fn approvers(&self) -> Vec<UserId> {
        self.steps.iter().map(|step| step.approver.clone()).collect()
    }

    /// Structural checks run on every loaded chain before it is trusted.
    pub fn check_integrity(&self) -> Result<(), WorkflowError> {
        let mut sequences = HashSet::new();
        for step in &self.steps {
            if step.document_id != self.document.id {
                return Err(WorkflowError::InvariantViolation(format!(
                    "step {} belongs to {} but was loaded for {}",
                    step.id.0, step.document_id.0, self.document.id.0
                )));
            }
            if step.sequence == 0 || !sequences.insert(step.sequence) {
                return Err(WorkflowError::InvariantViolation(format!(
                    "document {} has an invalid or repeated sequence order {}",
                    self.document.id.0, step.sequence
                )));
            }
        }
        Ok(())
    }
}

/// Result of a validated decision, applied atomically by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub document: Document,
    pub step: ApprovalStep,
    pub notification: NewNotification,
}

impl DecisionOutcome {
    pub fn completed(&self) -> bool {
        self.document.status.is_terminal()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionableStep {
    pub document: Document,
    pub step: ApprovalStep,
    pub is_current_turn: bool,
}

pub fn validate_draft(draft: &DocumentDraft) -> Result<(), WorkflowError> {
    if draft.title.trim().is_empty() {
        return Err(WorkflowError::Validation("title must not be blank".to_string()));
    }
    if draft.amount < Decimal::ZERO {
        return Err(WorkflowError::Validation("amount must not be negative".to_string()));
    }
    if draft.currency.trim().len() != 3 {
        return Err(WorkflowError::Validation(
            "currency must be a three-letter code".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_approvers(approvers: &[UserId], max_approvers: usize) -> Result<(), WorkflowError> {
    if approvers.is_empty() {
        return Err(WorkflowError::Validation("at least one approver is required".to_string()));
    }
    if approvers.len() > max_approvers {
        return Err(WorkflowError::Validation(format!(
            "approval chain allows at most {max_approvers} approvers (got {})",
            approvers.len()
        )));
    }

    let mut seen = HashSet::new();
    for approver in approvers {
        if approver.0.trim().is_empty() {
            return Err(WorkflowError::Validation("approver identity must not be blank".to_string()));
        }
        if !seen.insert(approver) {
            return Err(WorkflowError::Validation(format!(
                "approver `{approver}` appears more than once"
            )));
        }
    }
    Ok(())
}

/// Builds a new pending document with one step per approver, numbered 1..N in list order.
pub fn build_chain(
    id: DocumentId,
    initiator: UserId,
    draft: DocumentDraft,
    approvers: &[UserId],
    now: DateTime<Utc>,
) -> ChainSnapshot {
    let document = Document::submit(id, initiator, draft, now);
    let steps = approvers
        .iter()
        .zip(1u32..)
        .map(|(approver, sequence)| {
            ApprovalStep::pending(document.id.clone(), approver.clone(), sequence)
        })
        .collect();
    ChainSnapshot::new(document, steps)
}

/// Validates `decision` against the loaded chain and computes its effect.
///
/// Checks run in a fixed order so each failure is distinct: resolved document, unassigned
/// approver, out-of-turn approver, already-decided step.
pub fn plan_decision(
    snapshot: &ChainSnapshot,
    approver: &UserId,
    decision: Decision,
    now: DateTime<Utc>,
) -> Result<DecisionOutcome, WorkflowError> {
    if snapshot.document.status != DocumentStatus::Pending {
        return Err(WorkflowError::InvalidState(InvalidStateReason::DocumentResolved {
            status: snapshot.document.status,
        }));
    }

    let Some(own_step) = snapshot.step_for(approver) else {
        return Err(WorkflowError::Forbidden(ForbiddenReason::NotAssignedApprover));
    };

    if let Some(current) = snapshot.current_step() {
        if current.id != own_step.id {
            return Err(WorkflowError::Forbidden(ForbiddenReason::NotYourTurn {
                current_sequence: current.sequence,
            }));
        }
    }

    if !own_step.is_pending() {
        return Err(WorkflowError::InvalidState(InvalidStateReason::StepAlreadyDecided {
            status: own_step.status,
        }));
    }

    let mut step = own_step.clone();
    step.decide(decision, now)?;

    let remaining = snapshot.steps.iter().filter(|s| s.id != step.id && s.is_pending()).count();
    let mut document = snapshot.document.clone();
    let kind = match decision {
        Decision::Reject => {
            document.resolve(DocumentStatus::Rejected, now)?;
            NotificationKind::DocumentRejected
        }
        Decision::Approve if remaining == 0 => {
            document.resolve(DocumentStatus::Approved, now)?;
            NotificationKind::DocumentApproved
        }
        Decision::Approve => NotificationKind::StepApproved,
    };

    let notification = NewNotification {
        recipient: document.initiator.clone(),
        kind,
        message: decision_message(&document, &step, decision, snapshot.steps.len(), remaining),
        document_id: document.id.clone(),
    };

    Ok(DecisionOutcome { document, step, notification })
}

fn decision_message(
    document: &Document,
    step: &ApprovalStep,
    decision: Decision,
    total_steps: usize,
    remaining: usize,
) -> String {
    let head = format!(
        "{} {} \"{}\" (step {} of {})",
        step.approver, decision, document.title, step.sequence, total_steps
    );
    match document.status {
        DocumentStatus::Rejected => format!("{head}; the document was rejected"),
        DocumentStatus::Approved => format!("{head}; the document is fully approved"),
        DocumentStatus::Pending => format!("{head}; {remaining} approval(s) remaining"),
    }
}

/// Annotates every step naming `approver` with whether it is that document's current turn.
pub fn actionable_steps(snapshots: &[ChainSnapshot], approver: &UserId) -> Vec<ActionableStep> {
    snapshots
        .iter()
        .filter_map(|snapshot| {
            snapshot.step_for(approver).map(|step| ActionableStep {
                document: snapshot.document.clone(),
                step: step.clone(),
                is_current_turn: snapshot.is_current_turn(step),
            })
        })
        .collect()
}
