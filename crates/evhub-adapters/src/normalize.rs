//! Pure mapping from upstream item shapes into [`CanonicalEvent`].
//!
//! Every function here is total: malformed or missing upstream fields degrade
//! to an empty string or `None`, never to an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use evhub_core::CanonicalEvent;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use crate::{PayloadChunk, PayloadShape};

pub const PLACES_SOURCE: &str = "google_places";
pub const SEARCH_SOURCE: &str = "google_search";
pub const SCRAPED_SOURCE: &str = "apify_facebook_events";

/// Keyword -> canonical city. Scanned in order; first substring hit wins.
const CITY_KEYWORDS: &[(&str, &str)] = &[
    ("johannesburg", "Johannesburg"),
    ("joburg", "Johannesburg"),
    ("jozi", "Johannesburg"),
    ("jhb", "Johannesburg"),
    ("sandton", "Johannesburg"),
    ("soweto", "Johannesburg"),
    ("pretoria", "Pretoria"),
    ("tshwane", "Pretoria"),
    ("centurion", "Pretoria"),
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Normalize every item in `chunk`. Chunks without a known shape marker
/// produce nothing.
pub fn normalize_chunk(chunk: &PayloadChunk) -> Vec<CanonicalEvent> {
    let Some(shape) = PayloadShape::detect(chunk) else {
        debug!(keys = ?chunk.keys().collect::<Vec<_>>(), "skipping chunk with unknown shape");
        return Vec::new();
    };
    shape
        .items(chunk)
        .into_iter()
        .map(|item| normalize(item, &shape))
        .collect()
}

/// Map one upstream item of the given shape into a canonical event.
pub fn normalize(item: &JsonValue, shape: &PayloadShape) -> CanonicalEvent {
    match shape {
        PayloadShape::Places => normalize_places_item(item),
        PayloadShape::SearchResults => normalize_search_item(item),
        PayloadShape::ScrapedEvent { fallback_city } => {
            normalize_scraped_item(item, fallback_city.as_deref())
        }
    }
}

fn normalize_places_item(item: &JsonValue) -> CanonicalEvent {
    CanonicalEvent {
        title: clean_text(item.get("name")),
        start_date: parse_datetime(item.get("start_time")),
        venue_name: clean_text(item.get("venue")),
        city: normalize_city(first_text(&[item.get("city"), item.get("formatted_address")])),
        category: derive_category(item.get("types")),
        event_url: normalize_url(item.get("website")),
        source: PLACES_SOURCE.to_string(),
        raw_payload: item.clone(),
        fingerprint: None,
    }
}

fn normalize_search_item(item: &JsonValue) -> CanonicalEvent {
    // Only the first metatag block is trusted.
    let meta = item.pointer("/pagemap/metatags/0");
    let tag = |name: &str| meta.and_then(|m| m.get(name));

    CanonicalEvent {
        title: clean_text(first_text(&[item.get("title"), tag("og:title")])),
        start_date: parse_datetime(first_text(&[tag("event:start_time"), tag("startdate")])),
        venue_name: clean_text(first_text(&[tag("event:venue"), tag("og:site_name")])),
        city: normalize_city(first_text(&[tag("event:city"), tag("og:locality")])),
        category: derive_category(tag("event:category")),
        event_url: normalize_url(first_text(&[item.get("link"), tag("og:url")])),
        source: SEARCH_SOURCE.to_string(),
        raw_payload: item.clone(),
        fingerprint: None,
    }
}

fn normalize_scraped_item(item: &JsonValue, fallback_city: Option<&str>) -> CanonicalEvent {
    let location = item.get("location");
    let city = match first_text(&[location.and_then(|l| l.get("city"))]) {
        Some(value) => normalize_city(Some(value)),
        None => fallback_city.map(normalize_city_str).unwrap_or_default(),
    };

    CanonicalEvent {
        title: clean_text(item.get("name")),
        start_date: parse_datetime(first_text(&[item.get("utcStartDate"), item.get("startDate")])),
        venue_name: clean_text(location.and_then(|l| l.get("name"))),
        city,
        category: derive_category(first_category(&[item.get("category"), item.get("type")])),
        event_url: normalize_url(item.get("url")),
        source: SCRAPED_SOURCE.to_string(),
        raw_payload: item.clone(),
        fingerprint: None,
    }
}

/// First candidate that is a non-blank string.
fn first_text<'a>(candidates: &[Option<&'a JsonValue>]) -> Option<&'a JsonValue> {
    candidates
        .iter()
        .flatten()
        .copied()
        .find(|value| value.as_str().is_some_and(|s| !s.trim().is_empty()))
}

/// First candidate that is a non-blank string or an array holding one.
fn first_category<'a>(candidates: &[Option<&'a JsonValue>]) -> Option<&'a JsonValue> {
    candidates.iter().flatten().copied().find(|value| match value {
        JsonValue::String(s) => !s.trim().is_empty(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .any(|s| !s.trim().is_empty()),
        _ => false,
    })
}

pub fn clean_text(value: Option<&JsonValue>) -> String {
    value
        .and_then(JsonValue::as_str)
        .map(clean_str)
        .unwrap_or_default()
}

pub fn clean_str(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_city(value: Option<&JsonValue>) -> String {
    value
        .and_then(JsonValue::as_str)
        .map(normalize_city_str)
        .unwrap_or_default()
}

pub fn normalize_city_str(raw: &str) -> String {
    let lowered = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect::<String>();

    if let Some((_, canonical)) = CITY_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
    {
        return (*canonical).to_string();
    }

    raw.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uppercases the first character and lowercases the rest.
pub fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

pub fn derive_category(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .find(|s| !s.trim().is_empty())
            .map(|s| clean_str(&s.replace('_', " ")))
            .unwrap_or_default(),
        Some(JsonValue::String(s)) => clean_str(s),
        _ => String::new(),
    }
}

pub fn normalize_url(value: Option<&JsonValue>) -> Option<String> {
    value.and_then(JsonValue::as_str).and_then(normalize_url_str)
}

/// Absolute `http`/`https` URL reduced to scheme, host, port and path.
pub fn normalize_url_str(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate).ok()?;
    let scheme = if parsed.scheme() == "http" { "http" } else { "https" };
    let host = parsed.host_str().filter(|h| !h.is_empty())?;
    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
    Some(format!("{scheme}://{host}{port}{}", parsed.path()))
}

pub fn parse_datetime(value: Option<&JsonValue>) -> Option<DateTime<Utc>> {
    value.and_then(JsonValue::as_str).and_then(parse_datetime_str)
}

/// Lenient ISO-8601 parsing. Values without an offset are taken as UTC.
pub fn parse_datetime_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let with_offset = match raw.strip_suffix(['Z', 'z']) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };
    for fmt in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&with_offset, fmt) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
