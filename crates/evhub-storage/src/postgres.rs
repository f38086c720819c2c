//! Postgres-backed event store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evhub_core::{CanonicalEvent, EventPage, EventQuery, NaturalKey, StoredEvent};
use serde_json::Value as JsonValue;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Acquire, PgPool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::store::{EventStore, EventUnitOfWork, StoreError};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const EVENT_COLUMNS: &str = "id, created_at, updated_at, title, start_date, venue_name, city, \
                             category, event_url, source, raw_payload, fingerprint";

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        info!("event store migrations applied");
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn EventUnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn list_events(&self, query: &EventQuery) -> Result<EventPage, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
              FROM events
             WHERE ($1::TEXT IS NULL OR LOWER(city) = LOWER($1))
            "#,
        )
        .bind(query.city.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
              FROM events
             WHERE ($1::TEXT IS NULL OR LOWER(city) = LOWER($1))
             ORDER BY start_date DESC NULLS LAST, title ASC
             LIMIT $2 OFFSET $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query.city.as_deref())
            .bind(i64::try_from(query.page_size).unwrap_or(i64::MAX))
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let events = rows
            .iter()
            .map(stored_event_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventPage {
            count: count.max(0) as usize,
            events,
        })
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EventUnitOfWork for PgUnitOfWork {
    async fn find_and_replace(
        &mut self,
        key: &NaturalKey,
        event: &CanonicalEvent,
    ) -> Result<(StoredEvent, bool), StoreError> {
        let sql = upsert_sql(key);
        // Savepoint per item: a failed statement must not abort the run transaction.
        let mut savepoint = self.tx.begin().await?;
        let result = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&event.title)
            .bind(event.start_date)
            .bind(&event.venue_name)
            .bind(&event.city)
            .bind(&event.category)
            .bind(event.event_url.as_deref())
            .bind(&event.source)
            .bind(event.raw_payload.clone())
            .bind(event.fingerprint.as_deref())
            .fetch_one(&mut *savepoint)
            .await;

        match result {
            Ok(row) => {
                let created: bool = row.try_get("created")?;
                let stored = stored_event_from_row(&row)?;
                savepoint.commit().await?;
                Ok((stored, created))
            }
            Err(err) => {
                savepoint.rollback().await?;
                Err(classify_write_error(err, key))
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgUnitOfWork { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PgUnitOfWork { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

/// Insert-or-overwrite targeting the partial unique index for `key`.
/// `raw_payload`, `id` and `created_at` are left alone on conflict.
fn upsert_sql(key: &NaturalKey) -> String {
    let conflict_target = match key {
        NaturalKey::Url { .. } => "(source, event_url) WHERE event_url IS NOT NULL",
        NaturalKey::Fingerprint { .. } => {
            "(source, fingerprint) WHERE event_url IS NULL AND fingerprint IS NOT NULL"
        }
    };
    format!(
        r#"
        INSERT INTO events (
            id, title, start_date, venue_name, city, category,
            event_url, source, raw_payload, fingerprint, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
        ON CONFLICT {conflict_target}
        DO UPDATE SET title = EXCLUDED.title,
                      start_date = EXCLUDED.start_date,
                      venue_name = EXCLUDED.venue_name,
                      city = EXCLUDED.city,
                      category = EXCLUDED.category,
                      updated_at = NOW()
        RETURNING {EVENT_COLUMNS}, (xmax = 0) AS created
        "#
    )
}

fn classify_write_error(err: sqlx::Error, key: &NaturalKey) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        let constraint = db_err.constraint().map(ToString::to_string);
        if db_err.is_unique_violation() {
            return StoreError::Conflict {
                constraint: constraint.unwrap_or_else(|| key.constraint_name().to_string()),
                key: key.to_string(),
            };
        }
        if db_err.is_check_violation() {
            return StoreError::Constraint(
                constraint.unwrap_or_else(|| db_err.message().to_string()),
            );
        }
    }
    StoreError::Database(err)
}

fn stored_event_from_row(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    Ok(StoredEvent {
        id: row.try_get::<Uuid, _>("id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        title: row.try_get("title")?,
        start_date: row.try_get::<Option<DateTime<Utc>>, _>("start_date")?,
        venue_name: row.try_get("venue_name")?,
        city: row.try_get("city")?,
        category: row.try_get("category")?,
        event_url: row.try_get("event_url")?,
        source: row.try_get("source")?,
        raw_payload: row.try_get::<JsonValue, _>("raw_payload")?,
        fingerprint: row.try_get("fingerprint")?,
    })
}
