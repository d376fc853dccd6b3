use {
    crate::domain::{
        error::PipelineError,
        id::EventId,
        provider::BoxFuture,
        store::WebhookEventStore,
        webhook::DeadLetter,
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

/// Returns `true` if the event was recorded by this call.
pub async fn insert_processed(
    pool: &PgPool,
    event_id: &str,
    event_type: &str,
) -> Result<bool, PipelineError> {
    let inserted = sqlx::query_scalar::<_, bool>(
        r#"
        INSERT INTO webhook_events (event_id, event_type)
        VALUES ($1, $2)
        ON CONFLICT (event_id) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .fetch_optional(pool)
    .await?;

    Ok(inserted.is_some())
}

pub async fn is_processed_since(
    pool: &PgPool,
    event_id: &str,
    since: DateTime<Utc>,
) -> Result<bool, PipelineError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM webhook_events WHERE event_id = $1 AND processed_at > $2)",
    )
    .bind(event_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

pub async fn prune_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, PipelineError> {
    let result = sqlx::query("DELETE FROM webhook_events WHERE processed_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn insert_dead_letter(pool: &PgPool, letter: &DeadLetter) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO failed_webhooks (id, event_id, event_type, payload, error_message, attempts)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(letter.event_id.as_str())
    .bind(&letter.event_type)
    .bind(&letter.payload)
    .bind(&letter.error_message)
    .bind(i32::try_from(letter.attempts).unwrap_or(i32::MAX))
    .execute(pool)
    .await?;

    Ok(())
}

pub struct PgWebhookEventStore {
    pool: PgPool,
}

impl PgWebhookEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl WebhookEventStore for PgWebhookEventStore {
    fn insert_processed<'a>(&'a self, event_id: &'a EventId, event_type: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(insert_processed(&self.pool, event_id.as_str(), event_type))
    }

    fn is_processed_since<'a>(&'a self, event_id: &'a EventId, since: DateTime<Utc>) -> BoxFuture<'a, bool> {
        Box::pin(is_processed_since(&self.pool, event_id.as_str(), since))
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, u64> {
        Box::pin(prune_before(&self.pool, cutoff))
    }

    fn insert_dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, ()> {
        Box::pin(insert_dead_letter(&self.pool, letter))
    }
}
