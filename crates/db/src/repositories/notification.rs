use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use capflow_core::domain::document::DocumentId;
use capflow_core::domain::identity::UserId;
use capflow_core::domain::notification::{
    NewNotification, Notification, NotificationId, NotificationKind,
};
use capflow_core::errors::WorkflowError;
use capflow_core::store::NotificationStore;

use super::{column, decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_notification(row: &SqliteRow) -> Result<Notification, RepositoryError> {
    let kind_str: String = column(row, "kind")?;
    let is_read: i64 = column(row, "is_read")?;
    let created_at_str: String = column(row, "created_at")?;

    let kind = NotificationKind::parse(&kind_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown notification kind `{kind_str}`")))?;

    Ok(Notification {
        id: NotificationId(column(row, "id")?),
        recipient: UserId(column(row, "recipient_id")?),
        kind,
        message: column(row, "message")?,
        document_id: DocumentId(column(row, "document_id")?),
        read: is_read != 0,
        created_at: decode_timestamp("created_at", &created_at_str)?,
    })
}

pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &Notification,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO notification (id, recipient_id, kind, message, document_id, is_read,
                                   created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&notification.id.0)
    .bind(&notification.recipient.0)
    .bind(notification.kind.as_str())
    .bind(&notification.message)
    .bind(&notification.document_id.0)
    .bind(i64::from(notification.read))
    .bind(encode_timestamp(&notification.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_notification(
    conn: &mut SqliteConnection,
    id: &NotificationId,
) -> Result<Option<Notification>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, recipient_id, kind, message, document_id, is_read, created_at
         FROM notification WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_notification).transpose()
}

#[async_trait::async_trait]
impl NotificationStore for SqlNotificationRepository {
    async fn record(&self, event: NewNotification) -> Result<Notification, WorkflowError> {
        let notification = Notification::record(event, chrono::Utc::now());
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        insert_notification(&mut conn, &notification).await?;
        Ok(notification)
    }

    async fn list_for_recipient(
        &self,
        recipient: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT id, recipient_id, kind, message, document_id, is_read, created_at
             FROM notification
             WHERE recipient_id = ? AND (? = 0 OR is_read = 0)
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(&recipient.0)
        .bind(i64::from(unread_only))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_notification).collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_read(
        &self,
        id: &NotificationId,
        recipient: &UserId,
    ) -> Result<Notification, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        sqlx::query("UPDATE notification SET is_read = 1 WHERE id = ? AND recipient_id = ?")
            .bind(&id.0)
            .bind(&recipient.0)
            .execute(&mut *conn)
            .await
            .map_err(RepositoryError::from)?;

        match fetch_notification(&mut conn, id).await? {
            Some(notification) if &notification.recipient == recipient => Ok(notification),
            _ => Err(WorkflowError::NotFound { entity: "notification", id: id.0.clone() }),
        }
    }

    async fn unread_count(&self, recipient: &UserId) -> Result<u64, WorkflowError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(&recipient.0)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }
}
