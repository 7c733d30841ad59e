use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::chain::ChainSnapshot;
use crate::domain::approval::ApprovalStep;
use crate::domain::document::{Document, DocumentId, DocumentStatus};
use crate::domain::identity::UserId;
use crate::errors::{ForbiddenReason, InvalidStateReason, WorkflowError};

/// Builds the pending revision of a rejected document. The source chain is only read.
///
/// `existing_revision` is the id of a revision already created from `source`; a document is
/// revised at most once so its version history stays linear.
pub fn plan_revision(
    source: &ChainSnapshot,
    existing_revision: Option<&DocumentId>,
    requester: &UserId,
    new_id: DocumentId,
    now: DateTime<Utc>,
) -> Result<ChainSnapshot, WorkflowError> {
    if &source.document.initiator != requester {
        return Err(WorkflowError::Forbidden(ForbiddenReason::NotInitiator));
    }
    if source.document.status != DocumentStatus::Rejected {
        return Err(WorkflowError::InvalidState(InvalidStateReason::NotRejected {
            status: source.document.status,
        }));
    }
    if let Some(revision) = existing_revision {
        return Err(WorkflowError::InvalidState(InvalidStateReason::AlreadyRevised {
            revision_id: revision.0.clone(),
        }));
    }

    let document = source.document.revise(new_id, now);
    let steps = source
        .steps
        .iter()
        .map(|step| ApprovalStep::pending(document.id.clone(), step.approver.clone(), step.sequence))
        .collect();

    Ok(ChainSnapshot::new(document, steps))
}

/// Bounded walk along `previous_version_id` links.
///
/// Callers feed each fetched document to [`VersionWalk::visit`] and fetch whatever id it
/// returns next. Revisit of an id or more than `max_hops` links is reported as an invariant
/// violation instead of looping.
#[derive(Debug)]
pub struct VersionWalk {
    max_hops: usize,
    visited: HashSet<DocumentId>,
    newest_first: Vec<Document>,
}

impl VersionWalk {
    pub fn new(max_hops: usize) -> Self {
        Self { max_hops, visited: HashSet::new(), newest_first: Vec::new() }
    }

    pub fn visit(&mut self, document: Document) -> Result<Option<DocumentId>, WorkflowError> {
        if !self.visited.insert(document.id.clone()) {
            return Err(WorkflowError::InvariantViolation(format!(
                "version chain revisits document {}",
                document.id.0
            )));
        }

        let next = document.previous_version_id.clone();
        if next.is_some() && self.newest_first.len() >= self.max_hops {
            return Err(WorkflowError::InvariantViolation(format!(
                "version chain exceeds {} hops at document {}",
                self.max_hops, document.id.0
            )));
        }

        self.newest_first.push(document);
        Ok(next)
    }

    /// Id of the most recently visited document, used when a link cannot be resolved.
    pub fn last_visited(&self) -> Option<&DocumentId> {
        self.newest_first.last().map(|document| &document.id)
    }

    pub fn into_oldest_first(self) -> Vec<Document> {
        let mut chain = self.newest_first;
        chain.reverse();
        chain
    }
}
