use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::ProcessedEvent;

/// Records the event identity, returning `true` if the record was created by this call and `false` if the event
/// had already been recorded. The existence check and the write are one statement, so two redelivered copies of
/// the same message racing each other cannot both observe "not yet processed".
pub async fn insert_if_new(
    event_id: &str,
    event_type: &str,
    source_service: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO processed_events (event_id, event_type, source_service, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING;
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(source_service)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn fetch_by_event_id(
    event_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<ProcessedEvent>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM processed_events WHERE event_id = $1")
        .bind(event_id)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}
