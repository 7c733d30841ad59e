use capflow_core::domain::identity::UserId;
use capflow_core::store::NotificationStore;
use capflow_db::{connect_with_config, SqlNotificationRepository};
use serde::Serialize;

use crate::commands::{load_config, runtime, CommandResult, EXIT_DB_CONNECTIVITY};

#[derive(Debug, Serialize)]
struct InboxEntry {
    id: String,
    kind: &'static str,
    document_id: String,
    message: String,
    read: bool,
    created_at: String,
}

#[derive(Debug, Serialize)]
struct Inbox {
    recipient: String,
    unread_count: u64,
    notifications: Vec<InboxEntry>,
}

pub fn run(user_id: &str, unread_only: bool) -> CommandResult {
    let config = match load_config("inbox") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("inbox") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(
                    "inbox",
                    "db_connectivity",
                    error.to_string(),
                    EXIT_DB_CONNECTIVITY,
                );
            }
        };

        let repository = SqlNotificationRepository::new(pool.clone());
        let recipient = UserId::new(user_id);
        let listed = match repository.list_for_recipient(&recipient, unread_only).await {
            Ok(listed) => repository.unread_count(&recipient).await.map(|count| (listed, count)),
            Err(error) => Err(error),
        };
        pool.close().await;

        match listed {
            Ok((notifications, unread_count)) => {
                let notifications: Vec<InboxEntry> = notifications
                    .into_iter()
                    .map(|notification| InboxEntry {
                        id: notification.id.0,
                        kind: notification.kind.as_str(),
                        document_id: notification.document_id.0,
                        message: notification.message,
                        read: notification.read,
                        created_at: notification.created_at.to_rfc3339(),
                    })
                    .collect();
                CommandResult::success_with(
                    "inbox",
                    format!("{} notification(s), {unread_count} unread", notifications.len()),
                    Some(Inbox { recipient: recipient.0, unread_count, notifications }),
                )
            }
            Err(error) => CommandResult::workflow_failure("inbox", &error),
        }
    })
}
