use async_stream::stream;
use evhub_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use url::Url;

use crate::{cities_or_default, require_setting, AdapterError, ChunkStream, EventProvider};

pub const DEFAULT_GOOGLE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// Google Custom Search, one `events in <city>` query per city.
#[derive(Debug, Clone)]
pub struct GoogleSearchProvider {
    http: HttpFetcher,
    api_key: String,
    cse_id: String,
    cities: Vec<String>,
    endpoint: Url,
}

impl GoogleSearchProvider {
    pub fn new<S: AsRef<str>>(
        http: HttpFetcher,
        api_key: Option<String>,
        cse_id: Option<String>,
        cities: &[S],
    ) -> Result<Self, AdapterError> {
        let api_key = require_setting(api_key, "GOOGLE_API_KEY")?;
        let cse_id = require_setting(cse_id, "GOOGLE_CSE_ID")?;
        let endpoint = parse_endpoint(DEFAULT_GOOGLE_ENDPOINT)?;
        Ok(Self {
            http,
            api_key,
            cse_id,
            cities: cities_or_default(cities),
            endpoint,
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, AdapterError> {
        self.endpoint = parse_endpoint(endpoint)?;
        Ok(self)
    }

    pub fn cities(&self) -> &[String] {
        &self.cities
    }

    fn search_url(&self, city: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("cx", &self.cse_id)
            .append_pair("q", &format!("events in {city}"));
        url
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, AdapterError> {
    Url::parse(raw).map_err(|e| AdapterError::Configuration(format!("bad endpoint {raw}: {e}")))
}

impl EventProvider for GoogleSearchProvider {
    fn provider_name(&self) -> &'static str {
        "google"
    }

    fn fetch(&self) -> ChunkStream<'_> {
        Box::pin(stream! {
            for city in &self.cities {
                let url = self.search_url(city);
                match self.http.get_json(url.as_str(), None).await {
                    Ok(JsonValue::Object(chunk)) => {
                        let hits = chunk.get("items").and_then(JsonValue::as_array).map_or(0, Vec::len);
                        info!(%city, hits, "google search returned");
                        yield Ok::<_, AdapterError>(chunk);
                    }
                    Ok(_) => warn!(%city, "google search returned a non-object body; skipping city"),
                    Err(err) => error!(%city, error = %err, "google search failed; skipping city"),
                }
            }
        })
    }
}
