use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use capflow_core::chain::{ChainSnapshot, DecisionOutcome};
use capflow_core::domain::document::{Document, DocumentId};
use capflow_core::domain::identity::UserId;
use capflow_core::domain::notification::{NewNotification, Notification, NotificationId};
use capflow_core::errors::WorkflowError;
use capflow_core::store::{ChainStore, DecisionPlanner, NotificationStore, RevisionPlanner};

struct Slot {
    position: u64,
    chain: Arc<Mutex<ChainSnapshot>>,
}

/// Process-local store for tests and embedding.
///
/// Each document sits behind its own mutex, so decisions on one document serialize while
/// other documents proceed independently. Notifications are written while the document's
/// mutex is held, which keeps a decision and its notification in one unit.
#[derive(Default)]
pub struct InMemoryChainStore {
    documents: RwLock<HashMap<DocumentId, Slot>>,
    /// Source document id to the id of its single revision.
    revisions: RwLock<HashMap<DocumentId, DocumentId>>,
    next_position: AtomicU64,
    notifications: RwLock<Vec<Notification>>,
}

impl InMemoryChainStore {
    async fn slot(&self, id: &DocumentId) -> Option<Arc<Mutex<ChainSnapshot>>> {
        let documents = self.documents.read().await;
        documents.get(id).map(|slot| Arc::clone(&slot.chain))
    }

    async fn insert_slot(&self, chain: ChainSnapshot) -> Result<(), WorkflowError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&chain.document.id) {
            return Err(WorkflowError::Persistence(format!(
                "document {} already exists",
                chain.document.id.0
            )));
        }
        if let Some(previous) = &chain.document.previous_version_id {
            let mut revisions = self.revisions.write().await;
            if let Some(existing) = revisions.get(previous) {
                return Err(WorkflowError::Persistence(format!(
                    "document {} already has revision {}",
                    previous.0, existing.0
                )));
            }
            revisions.insert(previous.clone(), chain.document.id.clone());
        }
        let position = self.next_position.fetch_add(1, Ordering::SeqCst);
        documents.insert(
            chain.document.id.clone(),
            Slot { position, chain: Arc::new(Mutex::new(chain)) },
        );
        Ok(())
    }

    /// Snapshot of every chain, newest first.
    async fn snapshots(&self) -> Vec<ChainSnapshot> {
        let slots: Vec<(u64, Arc<Mutex<ChainSnapshot>>)> = {
            let documents = self.documents.read().await;
            documents.values().map(|slot| (slot.position, Arc::clone(&slot.chain))).collect()
        };

        let mut snapshots = Vec::with_capacity(slots.len());
        for (position, chain) in slots {
            snapshots.push((position, chain.lock().await.clone()));
        }
        snapshots.sort_by(|(left_position, left), (right_position, right)| {
            right
                .document
                .created_at
                .cmp(&left.document.created_at)
                .then(right_position.cmp(left_position))
        });
        snapshots.into_iter().map(|(_, snapshot)| snapshot).collect()
    }
}

#[async_trait::async_trait]
impl ChainStore for InMemoryChainStore {
    async fn insert_chain(&self, chain: ChainSnapshot) -> Result<(), WorkflowError> {
        self.insert_slot(chain).await
    }

    async fn find_document(&self, id: &DocumentId) -> Result<Option<Document>, WorkflowError> {
        match self.slot(id).await {
            Some(chain) => Ok(Some(chain.lock().await.document.clone())),
            None => Ok(None),
        }
    }

    async fn load_chain(&self, id: &DocumentId) -> Result<Option<ChainSnapshot>, WorkflowError> {
        match self.slot(id).await {
            Some(chain) => Ok(Some(chain.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn chains_for_approver(
        &self,
        approver: &UserId,
    ) -> Result<Vec<ChainSnapshot>, WorkflowError> {
        Ok(self
            .snapshots()
            .await
            .into_iter()
            .filter(|snapshot| snapshot.step_for(approver).is_some())
            .collect())
    }

    async fn documents_for_initiator(
        &self,
        initiator: &UserId,
    ) -> Result<Vec<Document>, WorkflowError> {
        Ok(self
            .snapshots()
            .await
            .into_iter()
            .map(|snapshot| snapshot.document)
            .filter(|document| &document.initiator == initiator)
            .collect())
    }

    async fn apply_decision(
        &self,
        id: &DocumentId,
        planner: DecisionPlanner,
    ) -> Result<(DecisionOutcome, Notification), WorkflowError> {
        let chain =
            self.slot(id).await.ok_or_else(|| WorkflowError::document_not_found(id.0.clone()))?;
        let mut snapshot = chain.lock().await;

        let outcome = planner(&*snapshot)?;

        let Some(step) = snapshot.steps.iter_mut().find(|step| step.id == outcome.step.id) else {
            return Err(WorkflowError::InvariantViolation(format!(
                "planned step {} is not part of document {}",
                outcome.step.id.0, id.0
            )));
        };
        *step = outcome.step.clone();
        snapshot.document = outcome.document.clone();

        let notification = Notification::record(outcome.notification.clone(), Utc::now());
        self.notifications.write().await.push(notification.clone());

        Ok((outcome, notification))
    }

    async fn insert_revision(
        &self,
        source_id: &DocumentId,
        planner: RevisionPlanner,
    ) -> Result<ChainSnapshot, WorkflowError> {
        let source = self
            .slot(source_id)
            .await
            .ok_or_else(|| WorkflowError::document_not_found(source_id.0.clone()))?;
        let source = source.lock().await;
        let existing = self.revisions.read().await.get(source_id).cloned();

        let revision = planner(&*source, existing.as_ref())?;
        self.insert_slot(revision.clone()).await?;
        Ok(revision)
    }
}

#[async_trait::async_trait]
impl NotificationStore for InMemoryChainStore {
    async fn record(&self, event: NewNotification) -> Result<Notification, WorkflowError> {
        let notification = Notification::record(event, Utc::now());
        self.notifications.write().await.push(notification.clone());
        Ok(notification)
    }

    async fn list_for_recipient(
        &self,
        recipient: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, WorkflowError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .rev()
            .filter(|notification| &notification.recipient == recipient)
            .filter(|notification| !unread_only || !notification.read)
            .cloned()
            .collect())
    }

    async fn mark_read(
        &self,
        id: &NotificationId,
        recipient: &UserId,
    ) -> Result<Notification, WorkflowError> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications
            .iter_mut()
            .find(|notification| &notification.id == id && &notification.recipient == recipient)
            .ok_or_else(|| WorkflowError::NotFound { entity: "notification", id: id.0.clone() })?;
        notification.read = true;
        Ok(notification.clone())
    }

    async fn unread_count(&self, recipient: &UserId) -> Result<u64, WorkflowError> {
        let notifications = self.notifications.read().await;
        let count = notifications
            .iter()
            .filter(|notification| &notification.recipient == recipient && !notification.read)
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use capflow_core::chain::{build_chain, plan_decision, plan_revision, ChainSnapshot};
    use capflow_core::domain::approval::Decision;
    use capflow_core::domain::document::{DocumentDraft, DocumentId, DocumentType};
    use capflow_core::domain::identity::UserId;
    use capflow_core::domain::notification::NotificationKind;
    use capflow_core::errors::{InvalidStateReason, WorkflowError};
    use capflow_core::store::{ChainStore, NotificationStore};

    use super::InMemoryChainStore;

    fn chain(id: &str) -> ChainSnapshot {
        build_chain(
            DocumentId(id.to_string()),
            UserId::new("owner"),
            DocumentDraft {
                title: "Cloud credits".to_string(),
                description: String::new(),
                amount: Decimal::new(50_000, 0),
                currency: "USD".to_string(),
                document_type: DocumentType::Opex,
                attachment: None,
            },
            &[UserId::new("a"), UserId::new("b")],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_document_ids_are_refused() {
        let store = InMemoryChainStore::default();
        store.insert_chain(chain("DOC-1")).await.expect("first insert");

        let second = store.insert_chain(chain("DOC-1")).await;
        assert!(matches!(second, Err(WorkflowError::Persistence(_))));
    }

    #[tokio::test]
    async fn decision_updates_chain_and_records_notification() {
        let store = InMemoryChainStore::default();
        store.insert_chain(chain("DOC-1")).await.expect("insert");
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
        assert_eq!(notification.kind, NotificationKind::StepApproved);

        let loaded = store.load_chain(&id).await.expect("load").expect("exists");
        assert_eq!(loaded.current_step().map(|step| step.sequence), Some(2));
        assert_eq!(loaded.document, outcome.document);

        let inbox =
            store.list_for_recipient(&UserId::new("owner"), true).await.expect("notifications");
        assert_eq!(inbox.len(), 1);
        assert_eq!(store.unread_count(&UserId::new("owner")).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn refused_decision_records_nothing() {
        let store = InMemoryChainStore::default();
        store.insert_chain(chain("DOC-1")).await.expect("insert");

        let result = store
            .apply_decision(
                &DocumentId("DOC-1".to_string()),
                Box::new(|snapshot: &ChainSnapshot| {
                    plan_decision(snapshot, &UserId::new("b"), Decision::Approve, Utc::now())
                }),
            )
            .await;
        assert!(matches!(result, Err(WorkflowError::Forbidden(_))));
        assert_eq!(store.unread_count(&UserId::new("owner")).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn listings_are_newest_first() {
        let store = InMemoryChainStore::default();
        store.insert_chain(chain("DOC-1")).await.expect("insert 1");
        store.insert_chain(chain("DOC-2")).await.expect("insert 2");

        let documents =
            store.documents_for_initiator(&UserId::new("owner")).await.expect("documents");
        let ids: Vec<&str> = documents.iter().map(|d| d.id.0.as_str()).collect();
        assert_eq!(ids, vec!["DOC-2", "DOC-1"]);

        let chains = store.chains_for_approver(&UserId::new("b")).await.expect("chains");
        assert_eq!(chains.len(), 2);
        assert!(store.chains_for_approver(&UserId::new("z")).await.expect("none").is_empty());
    }

    #[tokio::test]
    async fn document_is_revised_at_most_once() {
        let store = InMemoryChainStore::default();
        store.insert_chain(chain("DOC-1")).await.expect("insert");
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

        let mut results = Vec::new();
        for new_id in ["DOC-2", "DOC-3"] {
            let new_id = DocumentId(new_id.to_string());
            let result = store
                .insert_revision(
                    &source_id,
                    Box::new(move |source: &ChainSnapshot, existing: Option<&DocumentId>| {
                        plan_revision(source, existing, &UserId::new("owner"), new_id, Utc::now())
                    }),
                )
                .await;
            results.push(result.map(|revision| revision.document.id.0));
        }

        assert_eq!(results[0], Ok("DOC-2".to_string()));
        assert_eq!(
            results[1],
            Err(WorkflowError::InvalidState(InvalidStateReason::AlreadyRevised {
                revision_id: "DOC-2".to_string(),
            }))
        );
        let missing = store.load_chain(&DocumentId("DOC-3".to_string())).await.expect("load");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn second_chain_linked_to_the_same_source_is_refused() {
        let store = InMemoryChainStore::default();
        store.insert_chain(chain("DOC-1")).await.expect("insert source");
        let mut first = chain("DOC-2");
        first.document.previous_version_id = Some(DocumentId("DOC-1".to_string()));
        store.insert_chain(first).await.expect("first revision");

        let mut second = chain("DOC-3");
        second.document.previous_version_id = Some(DocumentId("DOC-1".to_string()));
        let result = store.insert_chain(second).await;
        assert!(matches!(result, Err(WorkflowError::Persistence(_))));
    }
}
