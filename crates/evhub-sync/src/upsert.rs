//! Create-or-update of one canonical event against a unit of work.

use evhub_core::{CanonicalEvent, NaturalKey, StoredEvent};
use evhub_storage::{EventUnitOfWork, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("event has neither a url nor a fingerprint")]
    MissingIdentity,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Picks the natural key for `event`. A URL always wins, and any
/// fingerprint riding along with it is cleared.
pub fn natural_key(event: &mut CanonicalEvent) -> Result<NaturalKey, UpsertError> {
    if let Some(event_url) = &event.event_url {
        event.fingerprint = None;
        return Ok(NaturalKey::Url {
            source: event.source.clone(),
            event_url: event_url.clone(),
        });
    }
    match &event.fingerprint {
        Some(fingerprint) => Ok(NaturalKey::Fingerprint {
            source: event.source.clone(),
            fingerprint: fingerprint.clone(),
        }),
        None => Err(UpsertError::MissingIdentity),
    }
}

/// Returns the stored row and whether it was newly created. Updates
/// overwrite every non-key field.
pub async fn upsert(
    uow: &mut dyn EventUnitOfWork,
    mut event: CanonicalEvent,
) -> Result<(StoredEvent, bool), UpsertError> {
    let key = natural_key(&mut event)?;
    let stored = uow.find_and_replace(&key, &event).await?;
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evhub_storage::{EventStore, InMemoryEventStore};
    use serde_json::json;

    fn event(url: Option<&str>, fingerprint: Option<&str>) -> CanonicalEvent {
        CanonicalEvent {
            title: "Soweto Jazz Picnic".into(),
            start_date: None,
            venue_name: "Walter Sisulu Square".into(),
            city: "Johannesburg".into(),
            category: "music event".into(),
            event_url: url.map(ToString::to_string),
            source: "google_places".into(),
            raw_payload: json!({}),
            fingerprint: fingerprint.map(ToString::to_string),
        }
    }

    #[test]
    fn url_key_drops_the_fingerprint() {
        let mut e = event(Some("https://example.com/a"), Some("abc"));
        let key = natural_key(&mut e).unwrap();
        assert!(matches!(key, NaturalKey::Url { .. }));
        assert_eq!(e.fingerprint, None);
    }

    #[test]
    fn fingerprint_key_is_used_without_url() {
        let mut e = event(None, Some("abc"));
        let key = natural_key(&mut e).unwrap();
        assert_eq!(key.to_string(), "google_places:fingerprint:abc");
    }

    #[tokio::test]
    async fn events_without_identity_never_reach_the_store() {
        let store = InMemoryEventStore::new();
        let mut uow = store.begin().await.unwrap();
        let err = upsert(uow.as_mut(), event(None, None)).await.unwrap_err();
        assert!(matches!(err, UpsertError::MissingIdentity));
        uow.commit().await.unwrap();
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_upsert_updates_the_same_row() {
        let store = InMemoryEventStore::new();
        let mut uow = store.begin().await.unwrap();
        let (first, created) = upsert(uow.as_mut(), event(Some("https://example.com/a"), Some("x")))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.fingerprint, None);

        let mut renamed = event(Some("https://example.com/a"), None);
        renamed.venue_name = "Orlando Stadium".into();
        let (second, created) = upsert(uow.as_mut(), renamed).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.venue_name, "Orlando Stadium");
    }
}
