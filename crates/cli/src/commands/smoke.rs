use std::time::Instant;

use std::sync::Arc;

use capflow_core::audit::AuditContext;
use capflow_core::config::{AppConfig, LoadOptions, WorkflowConfig};
use capflow_core::domain::approval::Decision;
use capflow_core::domain::document::{DocumentDraft, DocumentStatus, DocumentType};
use capflow_core::domain::identity::UserId;
use capflow_core::rust_decimal::Decimal;
use capflow_core::store::ChainStore;
use capflow_core::{ApprovalChainEngine, WorkflowError};
use capflow_db::{connect_with_config, migrations, InMemoryChainStore};
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_WORKFLOW};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("workflow_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("workflow_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(connect_with_config(&config.database));

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("workflow_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });
    runtime.block_on(async {
        pool.close().await;
    });

    match migration_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Fail,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: format!("migration execution failed: {error}"),
        }),
    }

    let roundtrip_started = Instant::now();
    let roundtrip = runtime.block_on(workflow_roundtrip(config.workflow.clone()));
    checks.push(SmokeCheck {
        name: "workflow_roundtrip",
        status: if roundtrip.is_ok() { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: roundtrip_started.elapsed().as_millis() as u64,
        message: match roundtrip {
            Ok(()) => "two-step chain approved in order".to_string(),
            Err(error) => format!("approval chain round trip failed: {error}"),
        },
    });

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// Drives a throwaway two-step chain through an in-memory store so smoke never writes
/// workflow rows into the configured database.
async fn workflow_roundtrip(workflow: WorkflowConfig) -> Result<(), WorkflowError> {
    let store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::default());
    let engine = ApprovalChainEngine::new(store, workflow);
    let audit = AuditContext::new("smoke", "smoke-initiator");
    let approvers = [UserId::new("smoke-first"), UserId::new("smoke-second")];

    let chain = engine
        .create_document(
            &UserId::new("smoke-initiator"),
            DocumentDraft {
                title: "Smoke check".to_string(),
                description: String::new(),
                amount: Decimal::ONE,
                currency: "USD".to_string(),
                document_type: DocumentType::Opex,
                attachment: None,
            },
            &approvers,
            &audit,
        )
        .await?;

    let out_of_turn =
        engine.submit_decision(&chain.document.id, &approvers[1], Decision::Approve, &audit).await;
    if out_of_turn.is_ok() {
        return Err(WorkflowError::InvariantViolation(
            "second approver decided before the first".to_string(),
        ));
    }

    let mut last = None;
    for approver in &approvers {
        let applied =
            engine.submit_decision(&chain.document.id, approver, Decision::Approve, &audit).await?;
        last = Some(applied);
    }

    match last.map(|applied| applied.document.status) {
        Some(DocumentStatus::Approved) => Ok(()),
        other => Err(WorkflowError::InvariantViolation(format!(
            "chain finished in unexpected state {other:?}"
        ))),
    }
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { EXIT_WORKFLOW } else { 0 }, output: format!("{human}\n{machine}") }
}
