use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use capflow_core::errors::WorkflowError;

pub mod approval_step;
pub mod chain;
pub mod document;
pub mod memory;
pub mod notification;

pub use chain::SqlChainStore;
pub use memory::InMemoryChainStore;
pub use notification::SqlNotificationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Encode(message) => Self::Persistence(message),
            RepositoryError::Decode(message) => {
                Self::InvariantViolation(format!("stored record could not be decoded: {message}"))
            }
            RepositoryError::Conflict(message) => Self::InvariantViolation(message),
        }
    }
}

/// Fixed-width UTC timestamps so that text ordering in SQL matches time ordering.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column} `{value}`: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| decode_timestamp(column, &raw)).transpose()
}

pub(crate) fn column<T>(row: &sqlx::sqlite::SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    use sqlx::Row;

    row.try_get(name).map_err(|error| RepositoryError::Decode(error.to_string()))
}
