use async_trait::async_trait;
use evhub_core::{CanonicalEvent, EventPage, EventQuery, NaturalKey, StoredEvent};
use thiserror::Error;

/// Name of the rule that exactly one of `event_url`/`fingerprint` is set.
pub const IDENTITY_CONSTRAINT: &str = "events_identity_exclusive";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint {constraint} violated for {key}")]
    Conflict { constraint: String, key: String },
    #[error("constraint {0} violated")]
    Constraint(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Run-scoped transaction. Dropping it without `commit` discards every write.
#[async_trait]
pub trait EventUnitOfWork: Send {
    /// Atomic create-or-overwrite keyed on `key`. Returns the stored row and
    /// whether it was created.
    async fn find_and_replace(
        &mut self,
        key: &NaturalKey,
        event: &CanonicalEvent,
    ) -> Result<(StoredEvent, bool), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn EventUnitOfWork>, StoreError>;

    /// Ordered by start date (newest first, undated last) then title.
    async fn list_events(&self, query: &EventQuery) -> Result<EventPage, StoreError>;
}
