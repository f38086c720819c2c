//! Provider contract, payload-shape dispatch and the concrete event providers.

mod apify;
mod fixture;
mod google;
pub mod normalize;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use evhub_storage::FetchError;
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use apify::{ApifyProvider, DEFAULT_APIFY_BASE_URL};
pub use fixture::FixtureProvider;
pub use google::{GoogleSearchProvider, DEFAULT_GOOGLE_ENDPOINT};
pub use normalize::{normalize, normalize_chunk};

pub const CRATE_NAME: &str = "evhub-adapters";

/// Cities queried by the network providers when none are configured.
pub const DEFAULT_CITIES: &[&str] = &["Johannesburg", "Pretoria"];

/// One JSON object emitted by a provider. Its keys decide the [`PayloadShape`].
pub type PayloadChunk = serde_json::Map<String, JsonValue>;

pub type ChunkStream<'a> = BoxStream<'a, Result<PayloadChunk, AdapterError>>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("provider misconfigured: {0}")]
    Configuration(String),
    #[error("fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },
    #[error(transparent)]
    Upstream(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

/// Source of raw payload chunks. `fetch` is lazy: nothing is read or
/// requested until the stream is polled.
pub trait EventProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn fetch(&self) -> ChunkStream<'_>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Fixtures,
    Google,
    ApifyFacebook,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Fixtures, Self::Google, Self::ApifyFacebook];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixtures => "fixtures",
            Self::Google => "google",
            Self::ApifyFacebook => "apify_facebook",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AdapterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                let known = Self::ALL.map(Self::as_str).join(", ");
                AdapterError::Configuration(format!(
                    "unknown provider '{value}' (expected one of: {known})"
                ))
            })
    }
}

/// Upstream payload layout, resolved once per chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{"results": [..]}` with flat place-style items.
    Places,
    /// `{"items": [..]}` with search hits carrying `pagemap.metatags`.
    SearchResults,
    /// `{"apify_raw_item": {..}, "fallback_city": ".."}`, one scraped event per chunk.
    ScrapedEvent { fallback_city: Option<String> },
}

impl PayloadShape {
    pub fn detect(chunk: &PayloadChunk) -> Option<Self> {
        if chunk.contains_key("results") {
            Some(Self::Places)
        } else if chunk.contains_key("items") {
            Some(Self::SearchResults)
        } else if chunk.contains_key("apify_raw_item") {
            let fallback_city = chunk
                .get("fallback_city")
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|city| !city.is_empty())
                .map(ToString::to_string);
            Some(Self::ScrapedEvent { fallback_city })
        } else {
            None
        }
    }

    pub fn source_tag(&self) -> &'static str {
        match self {
            Self::Places => normalize::PLACES_SOURCE,
            Self::SearchResults => normalize::SEARCH_SOURCE,
            Self::ScrapedEvent { .. } => normalize::SCRAPED_SOURCE,
        }
    }

    /// Raw items carried by `chunk`. A list marker holding anything but an
    /// array yields nothing.
    pub fn items<'a>(&self, chunk: &'a PayloadChunk) -> Vec<&'a JsonValue> {
        let listed = |marker: &str| match chunk.get(marker) {
            Some(JsonValue::Array(items)) => items.iter().collect(),
            _ => Vec::new(),
        };
        match self {
            Self::Places => listed("results"),
            Self::SearchResults => listed("items"),
            Self::ScrapedEvent { .. } => chunk.get("apify_raw_item").into_iter().collect(),
        }
    }
}

/// Trim, drop blanks and de-duplicate while keeping first-seen order.
pub fn clean_cities<S: AsRef<str>>(cities: &[S]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for city in cities {
        let city = city.as_ref().trim();
        if !city.is_empty() && !cleaned.iter().any(|seen| seen == city) {
            cleaned.push(city.to_string());
        }
    }
    cleaned
}

/// Configured cities, or [`DEFAULT_CITIES`] when none survive cleaning.
pub(crate) fn cities_or_default<S: AsRef<str>>(cities: &[S]) -> Vec<String> {
    let cleaned = clean_cities(cities);
    if cleaned.is_empty() {
        DEFAULT_CITIES.iter().map(ToString::to_string).collect()
    } else {
        cleaned
    }
}

pub(crate) fn require_setting(
    value: Option<String>,
    what: &str,
) -> Result<String, AdapterError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AdapterError::Configuration(format!("{what} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: JsonValue) -> PayloadChunk {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn provider_kind_round_trips_through_its_name() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert_eq!(
            " Apify_Facebook ".parse::<ProviderKind>().unwrap(),
            ProviderKind::ApifyFacebook
        );
        let err = "eventbrite".parse::<ProviderKind>().unwrap_err();
        assert!(err.to_string().contains("fixtures, google, apify_facebook"));
    }

    #[test]
    fn shape_markers_are_checked_in_priority_order() {
        let both = chunk(json!({"items": [], "results": [{"name": "x"}]}));
        assert_eq!(PayloadShape::detect(&both), Some(PayloadShape::Places));

        let search = chunk(json!({"kind": "customsearch#search", "items": []}));
        assert_eq!(PayloadShape::detect(&search), Some(PayloadShape::SearchResults));

        let scraped = chunk(json!({"apify_raw_item": {}, "fallback_city": " Pretoria "}));
        assert_eq!(
            PayloadShape::detect(&scraped),
            Some(PayloadShape::ScrapedEvent {
                fallback_city: Some("Pretoria".into())
            })
        );

        assert_eq!(PayloadShape::detect(&chunk(json!({"data": []}))), None);
    }

    #[test]
    fn non_array_markers_carry_no_items() {
        let places = chunk(json!({"results": {"name": "not a list"}}));
        assert!(PayloadShape::Places.items(&places).is_empty());

        let search = chunk(json!({"items": [{"title": "a"}, {"title": "b"}]}));
        assert_eq!(PayloadShape::SearchResults.items(&search).len(), 2);

        let scraped = chunk(json!({"apify_raw_item": {"name": "a"}}));
        let shape = PayloadShape::ScrapedEvent { fallback_city: None };
        assert_eq!(shape.items(&scraped).len(), 1);
        assert_eq!(shape.source_tag(), "apify_facebook_events");
    }

    #[test]
    fn city_lists_are_cleaned_and_defaulted() {
        assert_eq!(
            clean_cities(&[" Durban ", "", "Durban", "  ", "Soweto"]),
            vec!["Durban".to_string(), "Soweto".to_string()]
        );
        let none: [&str; 1] = [" "];
        assert_eq!(cities_or_default(&none), vec!["Johannesburg", "Pretoria"]);
    }

    #[test]
    fn blank_settings_are_missing() {
        assert!(require_setting(Some("  ".into()), "GOOGLE_API_KEY").is_err());
        assert!(require_setting(None, "GOOGLE_API_KEY").is_err());
        assert_eq!(
            require_setting(Some(" k ".into()), "GOOGLE_API_KEY").unwrap(),
            "k"
        );
    }
}
