use std::sync::Arc;

use capflow_core::config::{AppConfig, ConfigError, LoadOptions};
use capflow_core::store::{ChainStore, NotificationStore};
use capflow_core::ApprovalChainEngine;
use capflow_db::{connect_with_config, migrations, DbPool, SqlChainStore, SqlNotificationRepository};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: ApprovalChainEngine<dyn ChainStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState::new(
            self.engine.clone(),
            Arc::clone(&self.notifications),
            self.config.server.api_token.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        document_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        document_id = "unknown",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        document_id = "unknown",
        "database migrations applied"
    );

    let chains: Arc<dyn ChainStore> = Arc::new(SqlChainStore::new(db_pool.clone()));
    let engine = ApprovalChainEngine::new(chains, config.workflow.clone())
        .with_audit_sink(Arc::new(TracingAuditSink));
    let notifications: Arc<dyn NotificationStore> =
        Arc::new(SqlNotificationRepository::new(db_pool.clone()));

    Ok(Application { config, db_pool, engine, notifications })
}

#[cfg(test)]
mod tests {
    use capflow_core::audit::AuditContext;
    use capflow_core::config::{ConfigOverrides, LoadOptions};
    use capflow_core::domain::approval::Decision;
    use capflow_core::domain::document::{DocumentDraft, DocumentStatus, DocumentType};
    use capflow_core::domain::identity::UserId;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use crate::bootstrap::bootstrap;

    fn options(database_url: String) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_database_url() {
        let result = bootstrap(options("postgres://localhost/capflow".to_string())).await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn integration_smoke_covers_startup_and_decision_path() {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("smoke.db").display());
        let app = bootstrap(options(url)).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('document', 'approval_step', 'notification')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected workflow tables to be available after bootstrap");
        assert_eq!(table_count, 3, "bootstrap should expose the workflow tables");

        let audit = AuditContext::new("smoke", "initiator");
        let chain = app
            .engine
            .create_document(
                &UserId::new("initiator"),
                DocumentDraft {
                    title: "Smoke test purchase".to_string(),
                    description: String::new(),
                    amount: Decimal::new(100, 0),
                    currency: "USD".to_string(),
                    document_type: DocumentType::Opex,
                    attachment: None,
                },
                &[UserId::new("approver")],
                &audit,
            )
            .await
            .expect("create");
        let applied = app
            .engine
            .submit_decision(&chain.document.id, &UserId::new("approver"), Decision::Approve, &audit)
            .await
            .expect("approve");
        assert_eq!(applied.document.status, DocumentStatus::Approved);

        let unread =
            app.notifications.unread_count(&UserId::new("initiator")).await.expect("count");
        assert_eq!(unread, 1);

        app.db_pool.close().await;
    }
}
