use std::sync::Arc;

use capflow_core::audit::AuditContext;
use capflow_core::domain::document::{Document, DocumentId};
use capflow_core::store::ChainStore;
use capflow_core::ApprovalChainEngine;
use capflow_db::{connect_with_config, SqlChainStore};
use serde::Serialize;

use crate::commands::{load_config, runtime, CommandResult, EXIT_DB_CONNECTIVITY};

#[derive(Debug, Serialize)]
struct VersionEntry {
    id: String,
    version: u32,
    status: &'static str,
    title: String,
    amount: String,
    currency: String,
    previous_version_id: Option<String>,
    created_at: String,
}

impl From<&Document> for VersionEntry {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.0.clone(),
            version: document.version,
            status: document.status.as_str(),
            title: document.title.clone(),
            amount: document.amount.to_string(),
            currency: document.currency.clone(),
            previous_version_id: document.previous_version_id.as_ref().map(|id| id.0.clone()),
            created_at: document.created_at.to_rfc3339(),
        }
    }
}

pub fn run(document_id: &str) -> CommandResult {
    let config = match load_config("versions") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("versions") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(
                    "versions",
                    "db_connectivity",
                    error.to_string(),
                    EXIT_DB_CONNECTIVITY,
                );
            }
        };

        let store: Arc<dyn ChainStore> = Arc::new(SqlChainStore::new(pool.clone()));
        let engine = ApprovalChainEngine::new(store, config.workflow.clone());
        let audit = AuditContext::new("cli-versions", "operator");
        let chain = engine.get_version_chain(&DocumentId(document_id.to_string()), &audit).await;
        pool.close().await;

        match chain {
            Ok(documents) => {
                let entries: Vec<VersionEntry> = documents.iter().map(VersionEntry::from).collect();
                CommandResult::success_with(
                    "versions",
                    format!("{} version(s) in chain", entries.len()),
                    Some(entries),
                )
            }
            Err(error) => CommandResult::workflow_failure("versions", &error),
        }
    })
}
