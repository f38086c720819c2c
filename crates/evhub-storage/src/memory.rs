//! In-process event store with the same key and transaction semantics as Postgres.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use evhub_core::{CanonicalEvent, EventPage, EventQuery, NaturalKey, StoredEvent};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{EventStore, EventUnitOfWork, StoreError, IDENTITY_CONSTRAINT};

#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    rows: Arc<Mutex<Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<StoredEvent> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn EventUnitOfWork>, StoreError> {
        // Holding the guard for the whole unit of work serializes runs.
        let committed = Arc::clone(&self.rows).lock_owned().await;
        let staged = committed.clone();
        Ok(Box::new(InMemoryUnitOfWork { committed, staged }))
    }

    async fn list_events(&self, query: &EventQuery) -> Result<EventPage, StoreError> {
        let rows = self.rows.lock().await;
        let wanted = query.city.as_deref().map(str::to_lowercase);
        let mut matching = rows
            .iter()
            .filter(|e| match &wanted {
                Some(city) => e.city.to_lowercase() == *city,
                None => true,
            })
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(listing_order);

        let count = matching.len();
        let events = matching
            .into_iter()
            .skip(query.offset())
            .take(query.page_size)
            .collect();
        Ok(EventPage { count, events })
    }
}

fn listing_order(a: &StoredEvent, b: &StoredEvent) -> Ordering {
    let by_date = match (a.start_date, b.start_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| a.title.cmp(&b.title))
}

pub struct InMemoryUnitOfWork {
    committed: OwnedMutexGuard<Vec<StoredEvent>>,
    staged: Vec<StoredEvent>,
}

impl InMemoryUnitOfWork {
    fn check_row(&self, row: &StoredEvent, key: &NaturalKey) -> Result<(), StoreError> {
        if !row.has_exclusive_identity() {
            return Err(StoreError::Constraint(IDENTITY_CONSTRAINT.to_string()));
        }
        let clash = self.staged.iter().any(|other| {
            other.id != row.id
                && other.source == row.source
                && match (&row.event_url, &row.fingerprint) {
                    (Some(url), _) => other.event_url.as_ref() == Some(url),
                    (None, Some(fp)) => {
                        other.event_url.is_none() && other.fingerprint.as_ref() == Some(fp)
                    }
                    (None, None) => false,
                }
        });
        if clash {
            let constraint = if row.event_url.is_some() {
                "event_unique_source_url"
            } else {
                "event_unique_source_fingerprint"
            };
            return Err(StoreError::Conflict {
                constraint: constraint.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EventUnitOfWork for InMemoryUnitOfWork {
    async fn find_and_replace(
        &mut self,
        key: &NaturalKey,
        event: &CanonicalEvent,
    ) -> Result<(StoredEvent, bool), StoreError> {
        let now = Utc::now();
        match self.staged.iter().position(|row| key.matches(row)) {
            Some(pos) => {
                let mut updated = self.staged[pos].clone();
                updated.overwrite_from(event, now);
                self.check_row(&updated, key)?;
                self.staged[pos] = updated.clone();
                Ok((updated, false))
            }
            None => {
                let created = StoredEvent::create(event, now);
                self.check_row(&created, key)?;
                self.staged.push(created.clone());
                Ok((created, true))
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnitOfWork {
            mut committed,
            staged,
        } = *self;
        *committed = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(title: &str, url: Option<&str>, fingerprint: Option<&str>) -> CanonicalEvent {
        CanonicalEvent {
            title: title.to_string(),
            start_date: None,
            venue_name: String::new(),
            city: "Johannesburg".into(),
            category: String::new(),
            event_url: url.map(ToString::to_string),
            source: "google_places".into(),
            raw_payload: json!({"title": title}),
            fingerprint: fingerprint.map(ToString::to_string),
        }
    }

    fn url_key(url: &str) -> NaturalKey {
        NaturalKey::Url {
            source: "google_places".into(),
            event_url: url.into(),
        }
    }

    #[tokio::test]
    async fn second_write_to_same_key_updates_in_place() {
        let store = InMemoryEventStore::new();
        let mut uow = store.begin().await.unwrap();
        let key = url_key("https://example.com/a");
        let (first, created) = uow
            .find_and_replace(&key, &event("A", Some("https://example.com/a"), None))
            .await
            .unwrap();
        assert!(created);
        let (second, created) = uow
            .find_and_replace(&key, &event("A renamed", Some("https://example.com/a"), None))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.title, "A renamed");
        assert_eq!(second.raw_payload, json!({"title": "A"}));
        uow.commit().await.unwrap();

        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_writes() {
        let store = InMemoryEventStore::new();
        let key = url_key("https://example.com/a");

        let mut uow = store.begin().await.unwrap();
        uow.find_and_replace(&key, &event("A", Some("https://example.com/a"), None))
            .await
            .unwrap();
        uow.rollback().await.unwrap();
        assert!(store.snapshot().await.is_empty());

        {
            let mut uow = store.begin().await.unwrap();
            uow.find_and_replace(&key, &event("A", Some("https://example.com/a"), None))
                .await
                .unwrap();
        }
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn rows_with_both_or_neither_identity_are_rejected() {
        let store = InMemoryEventStore::new();
        let mut uow = store.begin().await.unwrap();
        let err = uow
            .find_and_replace(
                &url_key("https://example.com/a"),
                &event("A", Some("https://example.com/a"), Some("abc")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(c) if c == IDENTITY_CONSTRAINT));

        let err = uow
            .find_and_replace(&url_key("https://example.com/a"), &event("A", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn key_pointing_elsewhere_surfaces_conflict() {
        let store = InMemoryEventStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.find_and_replace(
            &url_key("https://example.com/a"),
            &event("A", Some("https://example.com/a"), None),
        )
        .await
        .unwrap();

        let err = uow
            .find_and_replace(
                &url_key("https://example.com/b"),
                &event("B", Some("https://example.com/a"), None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn listing_orders_newest_first_and_filters_city_case_insensitively() {
        let store = InMemoryEventStore::new();
        let mut uow = store.begin().await.unwrap();
        let dates = [
            ("Old", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single()),
            ("New", Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single()),
            ("Undated", None),
            ("Also New", Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single()),
        ];
        for (title, start) in dates {
            let mut e = event(title, None, Some(title));
            e.start_date = start;
            if title == "Old" {
                e.city = "Pretoria".into();
            }
            uow.find_and_replace(
                &NaturalKey::Fingerprint {
                    source: "google_places".into(),
                    fingerprint: title.into(),
                },
                &e,
            )
            .await
            .unwrap();
        }
        uow.commit().await.unwrap();

        let page = store.list_events(&EventQuery::default()).await.unwrap();
        let titles = page.events.iter().map(|e| e.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Also New", "New", "Old", "Undated"]);

        let page = store
            .list_events(&EventQuery::new(Some("PRETORIA".into()), None, None))
            .await
            .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.events[0].title, "Old");

        let page = store
            .list_events(&EventQuery::new(None, Some(2), Some(3)))
            .await
            .unwrap();
        assert_eq!(page.count, 4);
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].title, "Undated");
    }
}
