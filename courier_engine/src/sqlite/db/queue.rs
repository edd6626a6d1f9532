use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Appends a message to the topic's queue, immediately visible.
pub async fn enqueue(
    topic: &str,
    body: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO queue_messages (topic, body, visible_at, created_at) VALUES ($1, $2, $3, $3) RETURNING id",
    )
    .bind(topic)
    .bind(body)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

/// Claims up to `max` currently-visible messages on the topic, oldest first, hiding them until
/// `visible_until`. Claim and hide are one statement, so concurrent consumers never receive the
/// same message inside the visibility window.
pub async fn claim_messages(
    topic: &str,
    max: i64,
    now: DateTime<Utc>,
    visible_until: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<(i64, String)>, sqlx::Error> {
    let rows = sqlx::query_as(
        r#"
            UPDATE queue_messages
            SET visible_at = $1
            WHERE id IN (
                SELECT id FROM queue_messages WHERE topic = $2 AND visible_at <= $3 ORDER BY id ASC LIMIT $4
            )
            RETURNING id, body;
        "#,
    )
    .bind(visible_until)
    .bind(topic)
    .bind(now)
    .bind(max)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Deletes (acknowledges) the message. Returns `false` if the receipt no longer matches a message.
pub async fn delete_message(id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM queue_messages WHERE id = $1").bind(id).execute(conn).await?;
    Ok(result.rows_affected() == 1)
}

/// Total number of messages on the topic, visible or not.
pub async fn message_count(topic: &str, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM queue_messages WHERE topic = $1").bind(topic).fetch_one(conn).await?;
    Ok(count)
}
