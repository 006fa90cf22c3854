pub use llmproxy_core::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn map_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
        other => StoreError::transient(other),
    }
}

pub(crate) fn parse_uuid(raw: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).map_err(|e| StoreError::Internal(format!("invalid id: {e}")))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::Internal(format!("invalid timestamp: {e}")))
}

pub(crate) fn parse_opt_timestamp(
    raw: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    raw.map(|s| parse_timestamp(&s)).transpose()
}
