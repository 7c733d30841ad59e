use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use capflow_core::domain::document::{
    AttachmentRef, Document, DocumentId, DocumentStatus, DocumentType,
};
use capflow_core::domain::identity::UserId;

use super::{column, decode_optional_timestamp, decode_timestamp, encode_timestamp, RepositoryError};

const DOCUMENT_COLUMNS: &str = "id, title, description, amount, currency, document_type, status,
     initiator_id, version, previous_version_id, attachment_json, created_at, completed_at";

pub(crate) fn row_to_document(row: &SqliteRow) -> Result<Document, RepositoryError> {
    let amount_str: String = column(row, "amount")?;
    let document_type_str: String = column(row, "document_type")?;
    let status_str: String = column(row, "status")?;
    let version: i64 = column(row, "version")?;
    let previous_version_id: Option<String> = column(row, "previous_version_id")?;
    let attachment_json: Option<String> = column(row, "attachment_json")?;
    let created_at_str: String = column(row, "created_at")?;
    let completed_at_str: Option<String> = column(row, "completed_at")?;

    let amount = Decimal::from_str(&amount_str)
        .map_err(|error| RepositoryError::Decode(format!("amount `{amount_str}`: {error}")))?;
    let document_type = DocumentType::parse(&document_type_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown document type `{document_type_str}`"))
    })?;
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown document status `{status_str}`")))?;
    let version = u32::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("document version {version} out of range")))?;
    let attachment = attachment_json
        .map(|raw| serde_json::from_str::<AttachmentRef>(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("attachment_json: {error}")))?;

    Ok(Document {
        id: DocumentId(column(row, "id")?),
        title: column(row, "title")?,
        description: column(row, "description")?,
        amount,
        currency: column(row, "currency")?,
        document_type,
        status,
        initiator: UserId(column(row, "initiator_id")?),
        version,
        previous_version_id: previous_version_id.map(DocumentId),
        attachment,
        created_at: decode_timestamp("created_at", &created_at_str)?,
        completed_at: decode_optional_timestamp("completed_at", completed_at_str)?,
    })
}

/// Takes the document's write lock for the rest of the enclosing transaction.
///
/// Returns false when the document does not exist.
pub(crate) async fn lock_document(
    conn: &mut SqliteConnection,
    id: &DocumentId,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query("UPDATE document SET lock_version = lock_version + 1 WHERE id = ?")
        .bind(&id.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn insert_document(
    conn: &mut SqliteConnection,
    document: &Document,
) -> Result<(), RepositoryError> {
    let attachment_json = document
        .attachment
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| RepositoryError::Encode(format!("attachment: {error}")))?;

    sqlx::query(
        "INSERT INTO document (id, title, description, amount, currency, document_type, status,
                               initiator_id, version, previous_version_id, attachment_json,
                               created_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&document.id.0)
    .bind(&document.title)
    .bind(&document.description)
    .bind(document.amount.to_string())
    .bind(&document.currency)
    .bind(document.document_type.as_str())
    .bind(document.status.as_str())
    .bind(&document.initiator.0)
    .bind(i64::from(document.version))
    .bind(document.previous_version_id.as_ref().map(|id| id.0.as_str()))
    .bind(attachment_json)
    .bind(encode_timestamp(&document.created_at))
    .bind(document.completed_at.as_ref().map(encode_timestamp))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Writes a terminal status. Only a still-pending row is updated.
pub(crate) async fn record_resolution(
    conn: &mut SqliteConnection,
    document: &Document,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE document SET status = ?, completed_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(document.status.as_str())
    .bind(document.completed_at.as_ref().map(encode_timestamp))
    .bind(&document.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "document {} was no longer pending when its resolution was written",
            document.id.0
        )));
    }
    Ok(())
}

pub(crate) async fn fetch_document(
    conn: &mut SqliteConnection,
    id: &DocumentId,
) -> Result<Option<Document>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM document WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_document).transpose()
}

/// Id of the revision created from `id`, if there is one.
pub(crate) async fn fetch_revision_id(
    conn: &mut SqliteConnection,
    id: &DocumentId,
) -> Result<Option<DocumentId>, RepositoryError> {
    let revision_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM document WHERE previous_version_id = ?")
            .bind(&id.0)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(revision_id.map(DocumentId))
}

pub(crate) async fn fetch_documents_for_initiator(
    conn: &mut SqliteConnection,
    initiator: &UserId,
) -> Result<Vec<Document>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM document
         WHERE initiator_id = ?
         ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(&initiator.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_document).collect()
}

/// Documents with a step assigned to `approver`, newest first.
pub(crate) async fn fetch_documents_for_approver(
    conn: &mut SqliteConnection,
    approver: &UserId,
) -> Result<Vec<Document>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM document
         WHERE id IN (SELECT document_id FROM approval_step WHERE approver_id = ?)
         ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(&approver.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_document).collect()
}
