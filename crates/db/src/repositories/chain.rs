use chrono::Utc;
use sqlx::SqliteConnection;

use capflow_core::chain::{ChainSnapshot, DecisionOutcome};
use capflow_core::domain::document::{Document, DocumentId};
use capflow_core::domain::identity::UserId;
use capflow_core::domain::notification::Notification;
use capflow_core::errors::WorkflowError;
use capflow_core::store::{ChainStore, DecisionPlanner, RevisionPlanner};

use super::approval_step::{fetch_step_sets_for_approver, fetch_steps, insert_steps, record_decision};
use super::document::{
    fetch_document, fetch_documents_for_approver, fetch_documents_for_initiator, fetch_revision_id,
    insert_document, lock_document, record_resolution,
};
use super::notification::insert_notification;
use super::RepositoryError;
use crate::DbPool;

/// SQLite-backed chain store.
///
/// Every mutation opens a transaction whose first statement bumps the document's
/// `lock_version`. That write takes SQLite's writer lock, so the chain read and validated
/// afterwards cannot change before commit.
pub struct SqlChainStore {
    pool: DbPool,
}

impl SqlChainStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn fetch_chain(
    conn: &mut SqliteConnection,
    id: &DocumentId,
) -> Result<Option<ChainSnapshot>, RepositoryError> {
    let Some(document) = fetch_document(&mut *conn, id).await? else {
        return Ok(None);
    };
    let steps = fetch_steps(&mut *conn, id).await?;
    Ok(Some(ChainSnapshot::new(document, steps)))
}

#[async_trait::async_trait]
impl ChainStore for SqlChainStore {
    async fn insert_chain(&self, chain: ChainSnapshot) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        insert_document(&mut tx, &chain.document).await?;
        insert_steps(&mut tx, &chain.steps).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_document(&self, id: &DocumentId) -> Result<Option<Document>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_document(&mut conn, id).await?)
    }

    async fn load_chain(&self, id: &DocumentId) -> Result<Option<ChainSnapshot>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_chain(&mut conn, id).await?)
    }

    async fn chains_for_approver(
        &self,
        approver: &UserId,
    ) -> Result<Vec<ChainSnapshot>, WorkflowError> {
        // One read transaction so documents and steps come from the same snapshot.
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let documents = fetch_documents_for_approver(&mut tx, approver).await?;
        let mut step_sets = fetch_step_sets_for_approver(&mut tx, approver).await?;
        tx.commit().await.map_err(RepositoryError::from)?;

        Ok(documents
            .into_iter()
            .map(|document| {
                let steps = step_sets.remove(&document.id).unwrap_or_default();
                ChainSnapshot::new(document, steps)
            })
            .collect())
    }

    async fn documents_for_initiator(
        &self,
        initiator: &UserId,
    ) -> Result<Vec<Document>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_documents_for_initiator(&mut conn, initiator).await?)
    }

    async fn apply_decision(
        &self,
        id: &DocumentId,
        planner: DecisionPlanner,
    ) -> Result<(DecisionOutcome, Notification), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        if !lock_document(&mut tx, id).await? {
            return Err(WorkflowError::document_not_found(id.0.clone()));
        }
        let snapshot = fetch_chain(&mut tx, id)
            .await?
            .ok_or_else(|| WorkflowError::document_not_found(id.0.clone()))?;

        // A planner error drops `tx`, which rolls the lock bump back.
        let outcome = planner(&snapshot)?;

        record_decision(&mut tx, &outcome.step).await?;
        if outcome.document.status != snapshot.document.status {
            record_resolution(&mut tx, &outcome.document).await?;
        }
        let notification = Notification::record(outcome.notification.clone(), Utc::now());
        insert_notification(&mut tx, &notification).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok((outcome, notification))
    }

    async fn insert_revision(
        &self,
        source_id: &DocumentId,
        planner: RevisionPlanner,
    ) -> Result<ChainSnapshot, WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        if !lock_document(&mut tx, source_id).await? {
            return Err(WorkflowError::document_not_found(source_id.0.clone()));
        }
        let source = fetch_chain(&mut tx, source_id)
            .await?
            .ok_or_else(|| WorkflowError::document_not_found(source_id.0.clone()))?;

        let existing = fetch_revision_id(&mut tx, source_id).await?;

        let revision = planner(&source, existing.as_ref())?;

        insert_document(&mut tx, &revision.document).await?;
        insert_steps(&mut tx, &revision.steps).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use capflow_core::chain::{build_chain, plan_decision, plan_revision, ChainSnapshot};
    use capflow_core::domain::approval::{Decision, StepStatus};
    use capflow_core::domain::document::{
        DocumentDraft, DocumentId, DocumentStatus, DocumentType,
    };
    use capflow_core::domain::identity::UserId;
    use capflow_core::errors::{ForbiddenReason, InvalidStateReason, WorkflowError};
    use capflow_core::store::ChainStore;

    use super::SqlChainStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlChainStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlChainStore::new(pool)
    }

    fn chain(id: &str, approvers: &[&str]) -> ChainSnapshot {
        let approvers: Vec<UserId> = approvers.iter().map(|value| UserId::new(*value)).collect();
        build_chain(
            DocumentId(id.to_string()),
            UserId::new("owner"),
            DocumentDraft {
                title: "Fleet lease".to_string(),
                description: "12 vans".to_string(),
                amount: Decimal::new(3_600_000, 2),
                currency: "USD".to_string(),
                document_type: DocumentType::Opex,
                attachment: None,
            },
            &approvers,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn inserted_chain_loads_in_sequence_order() {
        let store = setup().await;
        let original = chain("DOC-1", &["a", "b", "c"]);
        store.insert_chain(original.clone()).await.expect("insert");

        let loaded =
            store.load_chain(&DocumentId("DOC-1".to_string())).await.expect("load").expect("exists");
        assert_eq!(loaded.approvers(), original.approvers());
        assert_eq!(loaded.steps.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(loaded.document.title, "Fleet lease");
    }

    #[tokio::test]
    async fn refused_decision_leaves_no_trace() {
        let store = setup().await;
        store.insert_chain(chain("DOC-1", &["a", "b"])).await.expect("insert");
        let id = DocumentId("DOC-1".to_string());

        let result = store
            .apply_decision(
                &id,
                Box::new(|snapshot: &ChainSnapshot| {
                    plan_decision(snapshot, &UserId::new("b"), Decision::Approve, Utc::now())
                }),
            )
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::Forbidden(ForbiddenReason::NotYourTurn { current_sequence: 1 }))
        ));

        let loaded = store.load_chain(&id).await.expect("load").expect("exists");
        assert!(loaded.steps.iter().all(|step| step.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn decision_commits_step_status_and_notification_together() {
        let store = setup().await;
        store.insert_chain(chain("DOC-1", &["a"])).await.expect("insert");
        let id = DocumentId("DOC-1".to_string());

        let (outcome, notification) = store
            .apply_decision(
                &id,
                Box::new(|snapshot: &ChainSnapshot| {
                    plan_decision(snapshot, &UserId::new("a"), Decision::Approve, Utc::now())
                }),
            )
            .await
            .expect("apply");

        assert_eq!(outcome.document.status, DocumentStatus::Approved);
        assert_eq!(notification.recipient, UserId::new("owner"));

        let loaded = store.load_chain(&id).await.expect("load").expect("exists");
        assert_eq!(loaded.document.status, DocumentStatus::Approved);
        assert!(loaded.document.completed_at.is_some());
        assert_eq!(loaded.steps[0].status, StepStatus::Approved);
    }

    #[tokio::test]
    async fn decision_on_missing_document_is_not_found() {
        let store = setup().await;
        let result = store
            .apply_decision(
                &DocumentId("DOC-404".to_string()),
                Box::new(|snapshot: &ChainSnapshot| {
                    plan_decision(snapshot, &UserId::new("a"), Decision::Approve, Utc::now())
                }),
            )
            .await;
        assert!(matches!(result, Err(WorkflowError::NotFound { .. })));
    }

    #[tokio::test]
    async fn chains_for_approver_carry_full_step_sets() {
        let store = setup().await;
        store.insert_chain(chain("DOC-1", &["a", "b"])).await.expect("insert 1");
        store.insert_chain(chain("DOC-2", &["c"])).await.expect("insert 2");
        store.insert_chain(chain("DOC-3", &["b", "c"])).await.expect("insert 3");

        let chains = store.chains_for_approver(&UserId::new("b")).await.expect("list");
        let ids: Vec<&str> = chains.iter().map(|c| c.document.id.0.as_str()).collect();
        assert_eq!(ids, vec!["DOC-3", "DOC-1"]);
        assert!(chains.iter().all(|c| c.steps.len() == 2));
    }

    #[tokio::test]
    async fn revision_is_inserted_alongside_untouched_source() {
        let store = setup().await;
        store.insert_chain(chain("DOC-1", &["a", "b"])).await.expect("insert");
        let source_id = DocumentId("DOC-1".to_string());
        store
            .apply_decision(
                &source_id,
                Box::new(|snapshot: &ChainSnapshot| {
                    plan_decision(snapshot, &UserId::new("a"), Decision::Reject, Utc::now())
                }),
            )
            .await
            .expect("reject");

        let revision = store
            .insert_revision(
                &source_id,
                Box::new(|source: &ChainSnapshot, existing: Option<&DocumentId>| {
                    plan_revision(
                        source,
                        existing,
                        &UserId::new("owner"),
                        DocumentId("DOC-2".to_string()),
                        Utc::now(),
                    )
                }),
            )
            .await
            .expect("revise");
        assert_eq!(revision.document.previous_version_id, Some(source_id.clone()));

        let source = store.load_chain(&source_id).await.expect("load").expect("source");
        assert_eq!(source.document.status, DocumentStatus::Rejected);
        assert_eq!(source.steps[0].status, StepStatus::Rejected);

        let stored = store
            .load_chain(&DocumentId("DOC-2".to_string()))
            .await
            .expect("load")
            .expect("revision");
        assert_eq!(stored.document.version, 2);
        assert!(stored.steps.iter().all(|step| step.status == StepStatus::Pending));
    }

    async fn revise(
        store: &SqlChainStore,
        source_id: &DocumentId,
        new_id: &str,
    ) -> Result<ChainSnapshot, WorkflowError> {
        let new_id = DocumentId(new_id.to_string());
        store
            .insert_revision(
                source_id,
                Box::new(move |source: &ChainSnapshot, existing: Option<&DocumentId>| {
                    plan_revision(source, existing, &UserId::new("owner"), new_id, Utc::now())
                }),
            )
            .await
    }

    #[tokio::test]
    async fn second_revision_of_the_same_document_is_refused() {
        let store = setup().await;
        store.insert_chain(chain("DOC-1", &["a"])).await.expect("insert");
        let source_id = DocumentId("DOC-1".to_string());
        store
            .apply_decision(
                &source_id,
                Box::new(|snapshot: &ChainSnapshot| {
                    plan_decision(snapshot, &UserId::new("a"), Decision::Reject, Utc::now())
                }),
            )
            .await
            .expect("reject");
        revise(&store, &source_id, "DOC-2").await.expect("first revision");

        let result = revise(&store, &source_id, "DOC-3").await;
        assert_eq!(
            result.map(|revision| revision.document.id),
            Err(WorkflowError::InvalidState(InvalidStateReason::AlreadyRevised {
                revision_id: "DOC-2".to_string(),
            }))
        );
        let missing = store.load_chain(&DocumentId("DOC-3".to_string())).await.expect("load");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn schema_allows_one_revision_per_document() {
        let store = setup().await;
        store.insert_chain(chain("DOC-1", &["a"])).await.expect("insert source");
        for (id, expect_ok) in [("DOC-2", true), ("DOC-3", false)] {
            let mut revision = chain(id, &["a"]);
            revision.document.previous_version_id = Some(DocumentId("DOC-1".to_string()));
            revision.document.version = 2;
            let result = store.insert_chain(revision).await;
            assert_eq!(result.is_ok(), expect_ok, "{id}: {result:?}");
        }
    }
}
