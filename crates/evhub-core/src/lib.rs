//! Core domain model for evhub: canonical events, natural keys, run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "evhub-core";

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 50;

/// Normalized, storage-bound representation of one upstream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub title: String,
    pub start_date: Option<DateTime<Utc>>,
    pub venue_name: String,
    pub city: String,
    pub category: String,
    pub event_url: Option<String>,
    pub source: String,
    pub raw_payload: JsonValue,
    pub fingerprint: Option<String>,
}

/// Identity a stored event is looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NaturalKey {
    Url { source: String, event_url: String },
    Fingerprint { source: String, fingerprint: String },
}

impl NaturalKey {
    /// Name of the uniqueness constraint guarding this kind of key.
    pub fn constraint_name(&self) -> &'static str {
        match self {
            NaturalKey::Url { .. } => "event_unique_source_url",
            NaturalKey::Fingerprint { .. } => "event_unique_source_fingerprint",
        }
    }

    pub fn matches(&self, event: &StoredEvent) -> bool {
        match self {
            NaturalKey::Url { source, event_url } => {
                event.source == *source && event.event_url.as_deref() == Some(event_url.as_str())
            }
            NaturalKey::Fingerprint {
                source,
                fingerprint,
            } => {
                event.source == *source
                    && event.event_url.is_none()
                    && event.fingerprint.as_deref() == Some(fingerprint.as_str())
            }
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NaturalKey::Url { source, event_url } => write!(f, "{source}:url:{event_url}"),
            NaturalKey::Fingerprint {
                source,
                fingerprint,
            } => write!(f, "{source}:fingerprint:{fingerprint}"),
        }
    }
}

/// Persisted event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub start_date: Option<DateTime<Utc>>,
    pub venue_name: String,
    pub city: String,
    pub category: String,
    pub event_url: Option<String>,
    pub source: String,
    pub raw_payload: JsonValue,
    pub fingerprint: Option<String>,
}

impl StoredEvent {
    pub fn create(event: &CanonicalEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: event.title.clone(),
            start_date: event.start_date,
            venue_name: event.venue_name.clone(),
            city: event.city.clone(),
            category: event.category.clone(),
            event_url: event.event_url.clone(),
            source: event.source.clone(),
            raw_payload: event.raw_payload.clone(),
            fingerprint: event.fingerprint.clone(),
        }
    }

    /// Last-write-wins overwrite. `id`, `created_at` and `raw_payload` are kept.
    pub fn overwrite_from(&mut self, event: &CanonicalEvent, now: DateTime<Utc>) {
        self.updated_at = now;
        self.title = event.title.clone();
        self.start_date = event.start_date;
        self.venue_name = event.venue_name.clone();
        self.city = event.city.clone();
        self.category = event.category.clone();
        self.event_url = event.event_url.clone();
        self.source = event.source.clone();
        self.fingerprint = event.fingerprint.clone();
    }

    pub fn has_exclusive_identity(&self) -> bool {
        self.event_url.is_some() != self.fingerprint.is_some()
    }
}

/// Per-run aggregate handed back to the caller of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub events: Vec<StoredEvent>,
    pub errors: Vec<String>,
}

impl IngestionReport {
    pub fn record_stored(&mut self, event: StoredEvent, created: bool) {
        if created {
            self.created += 1;
        } else {
            self.updated += 1;
        }
        self.events.push(event);
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_error(&mut self, title: &str, cause: impl std::fmt::Display) {
        let title = if title.is_empty() { "unknown" } else { title };
        self.errors.push(format!("{title}: {cause}"));
    }

    /// Items that reached a terminal bucket.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.skipped + self.errors.len()
    }
}

/// Listing filter used by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub city: Option<String>,
    pub page: usize,
    pub page_size: usize,
}

impl EventQuery {
    pub fn new(city: Option<String>, page: Option<usize>, page_size: Option<usize>) -> Self {
        let city = city
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Self {
            city,
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Rows to skip. Saturates for absurd page numbers.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Page count for `count` matching rows. Never zero.
    pub fn total_pages(&self, count: usize) -> usize {
        count.div_ceil(self.page_size).max(1)
    }

    /// Same filter, with `page` pulled back onto the last page.
    pub fn clamped_to(&self, count: usize) -> Self {
        Self {
            page: self.page.min(self.total_pages(count)),
            ..self.clone()
        }
    }
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub count: usize,
    pub events: Vec<StoredEvent>,
}
