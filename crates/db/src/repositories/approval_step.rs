use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use capflow_core::domain::approval::{ApprovalStep, ApprovalStepId, StepStatus};
use capflow_core::domain::document::DocumentId;
use capflow_core::domain::identity::UserId;

use super::{column, decode_optional_timestamp, encode_timestamp, RepositoryError};

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let sequence_order: i64 = column(row, "sequence_order")?;
    let status_str: String = column(row, "status")?;
    let decided_at_str: Option<String> = column(row, "decided_at")?;

    let sequence = u32::try_from(sequence_order).map_err(|_| {
        RepositoryError::Decode(format!("sequence order {sequence_order} out of range"))
    })?;
    let status = StepStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_str}`")))?;

    Ok(ApprovalStep {
        id: ApprovalStepId(column(row, "id")?),
        document_id: DocumentId(column(row, "document_id")?),
        approver: UserId(column(row, "approver_id")?),
        sequence,
        status,
        decided_at: decode_optional_timestamp("decided_at", decided_at_str)?,
    })
}

pub(crate) async fn insert_steps(
    conn: &mut SqliteConnection,
    steps: &[ApprovalStep],
) -> Result<(), RepositoryError> {
    for step in steps {
        sqlx::query(
            "INSERT INTO approval_step (id, document_id, approver_id, sequence_order, status,
                                        decided_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id.0)
        .bind(&step.document_id.0)
        .bind(&step.approver.0)
        .bind(i64::from(step.sequence))
        .bind(step.status.as_str())
        .bind(step.decided_at.as_ref().map(encode_timestamp))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Persists a step decision. Only a pending step is updated, so a replayed write fails.
pub(crate) async fn record_decision(
    conn: &mut SqliteConnection,
    step: &ApprovalStep,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_step SET status = ?, decided_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(step.status.as_str())
    .bind(step.decided_at.as_ref().map(encode_timestamp))
    .bind(&step.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "approval step {} was no longer pending when its decision was written",
            step.id.0
        )));
    }
    Ok(())
}

pub(crate) async fn fetch_steps(
    conn: &mut SqliteConnection,
    document_id: &DocumentId,
) -> Result<Vec<ApprovalStep>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, document_id, approver_id, sequence_order, status, decided_at
         FROM approval_step
         WHERE document_id = ?
         ORDER BY sequence_order ASC",
    )
    .bind(&document_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_step).collect()
}

/// Full step sets of every document that has a step assigned to `approver`, keyed by document.
pub(crate) async fn fetch_step_sets_for_approver(
    conn: &mut SqliteConnection,
    approver: &UserId,
) -> Result<HashMap<DocumentId, Vec<ApprovalStep>>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, document_id, approver_id, sequence_order, status, decided_at
         FROM approval_step
         WHERE document_id IN (SELECT document_id FROM approval_step WHERE approver_id = ?)
         ORDER BY document_id, sequence_order ASC",
    )
    .bind(&approver.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: HashMap<DocumentId, Vec<ApprovalStep>> = HashMap::new();
    for row in &rows {
        let step = row_to_step(row)?;
        grouped.entry(step.document_id.clone()).or_default().push(step);
    }
    Ok(grouped)
}
