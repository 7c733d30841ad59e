//! JSON API over the approval chain engine.
//!
//! Endpoints:
//! - `POST /api/v1/documents`                   submit a document with its ordered approvers
//! - `GET  /api/v1/documents`                   documents initiated by the caller
//! - `GET  /api/v1/documents/{id}`              document, steps and current step
//! - `POST /api/v1/documents/{id}/decisions`    approve or reject the caller's step
//! - `POST /api/v1/documents/{id}/revisions`    resubmit a rejected document as a new version
//! - `GET  /api/v1/documents/{id}/versions`     version chain, oldest first
//! - `GET  /api/v1/approvals`                   steps assigned to the caller
//! - `GET  /api/v1/notifications`               caller's notifications, newest first
//! - `POST /api/v1/notifications/{id}/read`     mark one notification as read
//!
//! Callers identify themselves with `x-user-id` and `x-user-role`. When the server is configured
//! with an API token, every request must also carry it in `x-service-token`.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use capflow_core::audit::AuditContext;
use capflow_core::chain::{ActionableStep, ChainSnapshot};
use capflow_core::domain::approval::Decision;
use capflow_core::domain::document::{
    AttachmentRef, Document, DocumentDraft, DocumentId, DocumentType,
};
use capflow_core::domain::identity::{Identity, Role, UserId};
use capflow_core::domain::notification::{Notification, NotificationId};
use capflow_core::errors::{InterfaceError, WorkflowError};
use capflow_core::store::{ChainStore, NotificationStore};
use capflow_core::{AppliedDecision, ApprovalChainEngine, DocumentDetails};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

const USER_ID_HEADER: &str = "x-user-id";
const USER_ROLE_HEADER: &str = "x-user-role";
const SERVICE_TOKEN_HEADER: &str = "x-service-token";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ApiState {
    engine: ApprovalChainEngine<dyn ChainStore>,
    notifications: Arc<dyn NotificationStore>,
    api_token: Option<Arc<SecretString>>,
}

impl ApiState {
    pub fn new(
        engine: ApprovalChainEngine<dyn ChainStore>,
        notifications: Arc<dyn NotificationStore>,
        api_token: Option<SecretString>,
    ) -> Self {
        Self { engine, notifications, api_token: api_token.map(Arc::new) }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/documents", post(create_document).get(list_my_documents))
        .route("/api/v1/documents/{id}", get(get_document))
        .route("/api/v1/documents/{id}/decisions", post(submit_decision))
        .route("/api/v1/documents/{id}/revisions", post(revise_document))
        .route("/api/v1/documents/{id}/versions", get(version_chain))
        .route("/api/v1/approvals", get(list_approvals))
        .route("/api/v1/notifications", get(list_notifications))
        .route("/api/v1/notifications/{id}/read", post(mark_notification_read))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// Authenticated caller resolved from request headers.
#[derive(Clone, Debug)]
pub struct Caller {
    pub identity: Identity,
    pub correlation_id: String,
}

impl Caller {
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    fn audit(&self) -> AuditContext {
        AuditContext::new(self.correlation_id.clone(), self.identity.user_id.as_str())
    }

    fn refuse(&self, error: WorkflowError) -> ApiError {
        ApiError::Interface(error.into_interface(self.correlation_id.clone()))
    }
}

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        resolve_caller(&parts.headers, state.api_token.as_deref())
    }
}

fn resolve_caller(
    headers: &HeaderMap,
    api_token: Option<&SecretString>,
) -> Result<Caller, ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(expected) = api_token {
        match header(SERVICE_TOKEN_HEADER) {
            Some(provided) if provided == expected.expose_secret() => {}
            Some(_) => return Err(ApiError::Unauthorized("invalid service token")),
            None => return Err(ApiError::Unauthorized("missing service token")),
        }
    }

    let user_id = header(USER_ID_HEADER).ok_or(ApiError::Unauthorized("missing x-user-id"))?;
    let role = match header(USER_ROLE_HEADER) {
        Some(value) => Role::parse(value).ok_or(ApiError::Unauthorized("unknown x-user-role"))?,
        None => Role::Employee,
    };
    let correlation_id = header(REQUEST_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()));

    Ok(Caller { identity: Identity::new(user_id, role), correlation_id })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    Interface(InterfaceError),
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "unauthorized".to_string(),
                    reason: None,
                    message: message.to_string(),
                    correlation_id: None,
                },
            ),
            Self::Interface(error) => {
                let (status, code, reason) = match &error {
                    InterfaceError::BadRequest { .. } => {
                        (StatusCode::BAD_REQUEST, "validation", None)
                    }
                    InterfaceError::Forbidden { reason, .. } => {
                        (StatusCode::FORBIDDEN, "forbidden", Some(reason.clone()))
                    }
                    InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", None),
                    InterfaceError::Conflict { reason, .. } => {
                        (StatusCode::CONFLICT, "invalid_state", Some(reason.clone()))
                    }
                    InterfaceError::ServiceUnavailable { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "unavailable", None)
                    }
                    InterfaceError::Internal { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal", None)
                    }
                };

                if status.is_server_error() {
                    error!(
                        event_name = "api.request.failed",
                        correlation_id = %error.correlation_id(),
                        status = status.as_u16(),
                        error = %error,
                        "request failed"
                    );
                } else {
                    warn!(
                        event_name = "api.request.refused",
                        correlation_id = %error.correlation_id(),
                        status = status.as_u16(),
                        error = %error,
                        "request refused"
                    );
                }

                (
                    status,
                    ErrorBody {
                        error: code.to_string(),
                        reason,
                        message: error.user_message(),
                        correlation_id: Some(error.correlation_id().to_string()),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub document_type: DocumentType,
    #[serde(default)]
    pub attachment: Option<AttachmentRef>,
    pub approvers: Vec<String>,
}

impl CreateDocumentRequest {
    fn into_parts(self) -> (DocumentDraft, Vec<UserId>) {
        let draft = DocumentDraft {
            title: self.title,
            description: self.description,
            amount: self.amount,
            currency: self.currency,
            document_type: self.document_type,
            attachment: self.attachment,
        };
        (draft, self.approvers.into_iter().map(UserId::new).collect())
    }
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationList {
    pub unread_count: u64,
    pub notifications: Vec<Notification>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn create_document(
    State(state): State<ApiState>,
    caller: Caller,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentDetails>), ApiError> {
    let (draft, approvers) = request.into_parts();
    let chain = state
        .engine
        .create_document(caller.user_id(), draft, &approvers, &caller.audit())
        .await
        .map_err(|error| caller.refuse(error))?;

    info!(
        event_name = "api.document.created",
        correlation_id = %caller.correlation_id,
        document_id = %chain.document.id.as_str(),
        approver_count = chain.steps.len(),
        "document submitted"
    );
    Ok((StatusCode::CREATED, Json(DocumentDetails::from(chain))))
}

pub async fn list_my_documents(
    State(state): State<ApiState>,
    caller: Caller,
) -> Result<Json<Vec<Document>>, ApiError> {
    state
        .engine
        .list_documents_for_initiator(caller.user_id())
        .await
        .map(Json)
        .map_err(|error| caller.refuse(error))
}

pub async fn get_document(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetails>, ApiError> {
    state
        .engine
        .get_document(&DocumentId(id))
        .await
        .map(Json)
        .map_err(|error| caller.refuse(error))
}

pub async fn submit_decision(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<AppliedDecision>, ApiError> {
    let applied = state
        .engine
        .submit_decision(&DocumentId(id), caller.user_id(), request.decision, &caller.audit())
        .await
        .map_err(|error| caller.refuse(error))?;

    info!(
        event_name = "api.decision.recorded",
        correlation_id = %caller.correlation_id,
        document_id = %applied.document.id.as_str(),
        decision = request.decision.as_str(),
        document_status = applied.document.status.as_str(),
        "decision recorded"
    );
    Ok(Json(applied))
}

pub async fn revise_document(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DocumentDetails>), ApiError> {
    let revision: ChainSnapshot = state
        .engine
        .revise_rejected(&DocumentId(id), caller.user_id(), &caller.audit())
        .await
        .map_err(|error| caller.refuse(error))?;

    info!(
        event_name = "api.document.revised",
        correlation_id = %caller.correlation_id,
        document_id = %revision.document.id.as_str(),
        version = revision.document.version,
        "revision submitted"
    );
    Ok((StatusCode::CREATED, Json(DocumentDetails::from(revision))))
}

pub async fn version_chain(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<Document>>, ApiError> {
    state
        .engine
        .get_version_chain(&DocumentId(id), &caller.audit())
        .await
        .map(Json)
        .map_err(|error| caller.refuse(error))
}

pub async fn list_approvals(
    State(state): State<ApiState>,
    caller: Caller,
) -> Result<Json<Vec<ActionableStep>>, ApiError> {
    state
        .engine
        .list_actionable_for(caller.user_id())
        .await
        .map(Json)
        .map_err(|error| caller.refuse(error))
}

pub async fn list_notifications(
    State(state): State<ApiState>,
    caller: Caller,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<NotificationList>, ApiError> {
    let notifications = state
        .notifications
        .list_for_recipient(caller.user_id(), query.unread_only)
        .await
        .map_err(|error| caller.refuse(error))?;
    let unread_count = state
        .notifications
        .unread_count(caller.user_id())
        .await
        .map_err(|error| caller.refuse(error))?;

    Ok(Json(NotificationList { unread_count, notifications }))
}

pub async fn mark_notification_read(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    state
        .notifications
        .mark_read(&NotificationId(id), caller.user_id())
        .await
        .map(Json)
        .map_err(|error| caller.refuse(error))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, Request, StatusCode},
        response::IntoResponse,
        Json,
    };
    use capflow_core::config::WorkflowConfig;
    use capflow_core::domain::approval::{Decision, StepStatus};
    use capflow_core::domain::document::{DocumentStatus, DocumentType};
    use capflow_core::domain::identity::{Identity, Role};
    use capflow_core::store::{ChainStore, NotificationStore};
    use capflow_core::ApprovalChainEngine;
    use capflow_db::InMemoryChainStore;
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::{
        create_document, get_document, list_approvals, list_notifications,
        mark_notification_read, resolve_caller, revise_document, router, submit_decision,
        version_chain, ApiError, ApiState, Caller, CreateDocumentRequest, DecisionRequest,
        ErrorBody, NotificationQuery,
    };

    fn state() -> ApiState {
        let store = Arc::new(InMemoryChainStore::default());
        let chains: Arc<dyn ChainStore> = store.clone();
        let notifications: Arc<dyn NotificationStore> = store;
        ApiState::new(ApprovalChainEngine::new(chains, WorkflowConfig::default()), notifications, None)
    }

    fn caller(user: &str) -> Caller {
        Caller {
            identity: Identity::new(user, Role::Employee),
            correlation_id: format!("req-test-{user}"),
        }
    }

    fn request(approvers: &[&str]) -> CreateDocumentRequest {
        CreateDocumentRequest {
            title: "Forklift replacement".to_string(),
            description: "Warehouse 2".to_string(),
            amount: Decimal::new(4_250_000, 2),
            currency: "EUR".to_string(),
            document_type: DocumentType::Capex,
            attachment: None,
            approvers: approvers.iter().map(|value| value.to_string()).collect(),
        }
    }

    async fn error_parts(error: ApiError) -> (StatusCode, ErrorBody) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("error body"))
    }

    #[tokio::test]
    async fn create_then_decide_walks_the_chain_in_order() {
        let state = state();
        let (status, Json(created)) = create_document(
            State(state.clone()),
            caller("initiator"),
            Json(request(&["a", "b"])),
        )
        .await
        .expect("create");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.steps.len(), 2);
        assert_eq!(created.current_step.as_ref().map(|step| step.sequence), Some(1));
        let id = created.document.id.0.clone();

        let Json(approvals) =
            list_approvals(State(state.clone()), caller("b")).await.expect("approvals");
        assert_eq!(approvals.len(), 1);
        assert!(!approvals[0].is_current_turn);

        let refused = submit_decision(
            State(state.clone()),
            caller("b"),
            Path(id.clone()),
            Json(DecisionRequest { decision: Decision::Approve }),
        )
        .await
        .expect_err("b must wait for a");
        let (status, body) = error_parts(refused).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.reason.as_deref(), Some("not_your_turn"));
        assert_eq!(body.correlation_id.as_deref(), Some("req-test-b"));

        let Json(applied) = submit_decision(
            State(state.clone()),
            caller("a"),
            Path(id.clone()),
            Json(DecisionRequest { decision: Decision::Approve }),
        )
        .await
        .expect("a approves");
        assert_eq!(applied.step.status, StepStatus::Approved);
        assert_eq!(applied.document.status, DocumentStatus::Pending);

        let Json(applied) = submit_decision(
            State(state.clone()),
            caller("b"),
            Path(id.clone()),
            Json(DecisionRequest { decision: Decision::Approve }),
        )
        .await
        .expect("b approves");
        assert_eq!(applied.document.status, DocumentStatus::Approved);

        let Json(details) =
            get_document(State(state.clone()), caller("initiator"), Path(id)).await.expect("get");
        assert_eq!(details.document.status, DocumentStatus::Approved);
        assert!(details.current_step.is_none());
    }

    #[tokio::test]
    async fn rejected_document_can_be_revised_and_traced() {
        let state = state();
        let (_, Json(created)) = create_document(
            State(state.clone()),
            caller("initiator"),
            Json(request(&["a"])),
        )
        .await
        .expect("create");
        let id = created.document.id.0.clone();

        let Json(rejected) = submit_decision(
            State(state.clone()),
            caller("a"),
            Path(id.clone()),
            Json(DecisionRequest { decision: Decision::Reject }),
        )
        .await
        .expect("reject");
        assert_eq!(rejected.document.status, DocumentStatus::Rejected);

        let refused = revise_document(State(state.clone()), caller("a"), Path(id.clone()))
            .await
            .expect_err("only the initiator revises");
        let (status, body) = error_parts(refused).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.reason.as_deref(), Some("not_initiator"));

        let (status, Json(revision)) =
            revise_document(State(state.clone()), caller("initiator"), Path(id.clone()))
                .await
                .expect("revise");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(revision.document.version, 2);

        let again = revise_document(State(state.clone()), caller("initiator"), Path(id.clone()))
            .await
            .expect_err("a document is revised once");
        let (status, body) = error_parts(again).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.reason.as_deref(), Some("already_revised"));

        let Json(versions) = version_chain(
            State(state.clone()),
            caller("initiator"),
            Path(revision.document.id.0.clone()),
        )
        .await
        .expect("versions");
        let ids: Vec<&str> = versions.iter().map(|document| document.id.as_str()).collect();
        assert_eq!(ids, vec![id.as_str(), revision.document.id.as_str()]);
    }

    #[tokio::test]
    async fn notifications_are_listed_and_marked_read_for_the_recipient() {
        let state = state();
        let (_, Json(created)) = create_document(
            State(state.clone()),
            caller("initiator"),
            Json(request(&["a"])),
        )
        .await
        .expect("create");
        let Json(approved) = submit_decision(
            State(state.clone()),
            caller("a"),
            Path(created.document.id.0.clone()),
            Json(DecisionRequest { decision: Decision::Approve }),
        )
        .await
        .expect("approve");
        assert_eq!(approved.document.status, DocumentStatus::Approved);

        let Json(inbox) = list_notifications(
            State(state.clone()),
            caller("initiator"),
            Query(NotificationQuery { unread_only: true }),
        )
        .await
        .expect("list");
        assert_eq!(inbox.unread_count, 1);
        assert_eq!(inbox.notifications.len(), 1);
        let notification_id = inbox.notifications[0].id.0.clone();

        let stranger =
            mark_notification_read(State(state.clone()), caller("a"), Path(notification_id.clone()))
                .await
                .expect_err("not the recipient");
        let (status, _) = error_parts(stranger).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let Json(read) =
            mark_notification_read(State(state.clone()), caller("initiator"), Path(notification_id))
                .await
                .expect("mark read");
        assert!(read.read);

        let Json(inbox) = list_notifications(
            State(state),
            caller("initiator"),
            Query(NotificationQuery { unread_only: true }),
        )
        .await
        .expect("list");
        assert_eq!(inbox.unread_count, 0);
        assert!(inbox.notifications.is_empty());
    }

    #[tokio::test]
    async fn validation_and_missing_documents_map_to_client_errors() {
        let state = state();
        let refused = create_document(State(state.clone()), caller("initiator"), Json(request(&[])))
            .await
            .expect_err("approvers are required");
        let (status, body) = error_parts(refused).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "validation");

        let missing = get_document(State(state), caller("initiator"), Path("missing".to_string()))
            .await
            .expect_err("unknown document");
        let (status, body) = error_parts(missing).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.message.contains("missing"));
    }

    #[test]
    fn caller_requires_identity_and_matching_service_token() {
        let token = SecretString::from("0123456789abcdef".to_string());
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("alice"));
        assert!(matches!(
            resolve_caller(&headers, Some(&token)),
            Err(ApiError::Unauthorized("missing service token"))
        ));

        headers.insert("x-service-token", HeaderValue::from_static("wrong-token-value"));
        assert!(matches!(
            resolve_caller(&headers, Some(&token)),
            Err(ApiError::Unauthorized("invalid service token"))
        ));

        headers.insert("x-service-token", HeaderValue::from_static("0123456789abcdef"));
        headers.insert("x-user-role", HeaderValue::from_static("manager"));
        headers.insert("x-request-id", HeaderValue::from_static("req-42"));
        let caller = resolve_caller(&headers, Some(&token)).expect("caller");
        assert_eq!(caller.identity.user_id.as_str(), "alice");
        assert_eq!(caller.identity.role, Role::Approver);
        assert_eq!(caller.correlation_id, "req-42");

        headers.remove("x-user-id");
        assert!(matches!(
            resolve_caller(&headers, Some(&token)),
            Err(ApiError::Unauthorized("missing x-user-id"))
        ));
    }

    #[tokio::test]
    async fn router_serves_created_documents_and_rejects_anonymous_callers() {
        let app = router(state());
        let payload = serde_json::json!({
            "title": "Laptop refresh",
            "amount": "1999.00",
            "currency": "USD",
            "document_type": "opex",
            "approvers": ["manager"]
        });

        let anonymous = app
            .clone()
            .oneshot(
                Request::post("/api/v1/documents")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let created = app
            .oneshot(
                Request::post("/api/v1/documents")
                    .header("content-type", "application/json")
                    .header("x-user-id", "initiator")
                    .header("x-user-role", "employee")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(created.status(), StatusCode::CREATED);
        let bytes = to_bytes(created.into_body(), usize::MAX).await.expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["document"]["status"], "pending");
        assert_eq!(body["current_step"]["approver"], "manager");
    }
}
