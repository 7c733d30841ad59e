use thiserror::Error;

use crate::domain::approval::StepStatus;
use crate::domain::document::DocumentStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid document transition from {from:?} to {to:?}")]
    InvalidDocumentTransition { from: DocumentStatus, to: DocumentStatus },
    #[error("invalid approval step transition from {from:?} to {to:?}")]
    InvalidStepTransition { from: StepStatus, to: StepStatus },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForbiddenReason {
    NotAssignedApprover,
    NotYourTurn { current_sequence: u32 },
    NotInitiator,
}

impl ForbiddenReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAssignedApprover => "not_assigned_approver",
            Self::NotYourTurn { .. } => "not_your_turn",
            Self::NotInitiator => "not_initiator",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::NotAssignedApprover => "not an assigned approver for this document".to_string(),
            Self::NotYourTurn { current_sequence } => {
                format!("not your turn yet: step {current_sequence} is awaiting a decision")
            }
            Self::NotInitiator => "only the original initiator may revise this document".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidStateReason {
    DocumentResolved { status: DocumentStatus },
    StepAlreadyDecided { status: StepStatus },
    NotRejected { status: DocumentStatus },
    AlreadyRevised { revision_id: String },
    Transition(DomainError),
}

impl InvalidStateReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DocumentResolved { .. } => "document_resolved",
            Self::StepAlreadyDecided { .. } => "step_already_decided",
            Self::NotRejected { .. } => "not_rejected",
            Self::AlreadyRevised { .. } => "already_revised",
            Self::Transition(_) => "invalid_transition",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::DocumentResolved { status } => {
                format!("document is already resolved ({})", status.as_str())
            }
            Self::StepAlreadyDecided { status } => {
                format!("approval step was already decided ({})", status.as_str())
            }
            Self::NotRejected { status } => {
                format!("only rejected documents may be revised (document is {})", status.as_str())
            }
            Self::AlreadyRevised { revision_id } => {
                format!("document was already revised as {revision_id}")
            }
            Self::Transition(error) => error.to_string(),
        }
    }
}

/// Failure kinds returned by the approval chain engine and its stores.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {}", .0.describe())]
    Forbidden(ForbiddenReason),
    #[error("invalid state: {}", .0.describe())]
    InvalidState(InvalidStateReason),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl WorkflowError {
    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { entity: "document", id: id.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::Validation(_) => "validation",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        Self::InvalidState(InvalidStateReason::Transition(value))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { reason: String, message: String, correlation_id: String },
    #[error("not found")]
    NotFound { correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { reason: String, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Message safe to show to end users. Rule failures keep their detail so callers can
    /// explain why an action is unavailable; data faults stay generic.
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. } => {
                format!("The request could not be processed: {message}")
            }
            Self::Forbidden { message, .. } | Self::Conflict { message, .. } => message.clone(),
            Self::NotFound { .. } => "The requested resource could not be found.".to_string(),
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_string()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_string(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl WorkflowError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<WorkflowError> for InterfaceError {
    fn from(value: WorkflowError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            WorkflowError::Validation(message) => Self::BadRequest { message, correlation_id },
            WorkflowError::Forbidden(reason) => Self::Forbidden {
                reason: reason.code().to_owned(),
                message: reason.describe(),
                correlation_id,
            },
            WorkflowError::InvalidState(reason) => Self::Conflict {
                reason: reason.code().to_owned(),
                message: reason.describe(),
                correlation_id,
            },
            WorkflowError::NotFound { .. } => Self::NotFound { correlation_id },
            WorkflowError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            WorkflowError::InvariantViolation(message) => Self::Internal { message, correlation_id },
        }
    }
}
