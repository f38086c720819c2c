use async_stream::stream;
use evhub_storage::HttpFetcher;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info, warn};

use crate::{
    cities_or_default, require_setting, AdapterError, ChunkStream, EventProvider, PayloadChunk,
};

pub const DEFAULT_APIFY_BASE_URL: &str = "https://api.apify.com/v2";

/// Seconds Apify holds each status request open while the run is busy.
const WAIT_FOR_FINISH_SECS: u32 = 60;
const DEFAULT_MAX_WAIT_ROUNDS: usize = 10;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    id: String,
    status: String,
    #[serde(default)]
    default_dataset_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActorInput<'a> {
    search_queries: [&'a str; 1],
    start_urls: [&'a str; 0],
    max_events: u32,
}

/// Facebook events scraped by an Apify actor, one actor run per city.
#[derive(Debug, Clone)]
pub struct ApifyProvider {
    http: HttpFetcher,
    token: String,
    actor_id: String,
    cities: Vec<String>,
    max_events: u32,
    base_url: String,
    max_wait_rounds: usize,
}

impl ApifyProvider {
    pub fn new<S: AsRef<str>>(
        http: HttpFetcher,
        token: Option<String>,
        actor_id: Option<String>,
        cities: &[S],
        max_events: u32,
    ) -> Result<Self, AdapterError> {
        let token = require_setting(token, "APIFY_TOKEN")?;
        // The REST API addresses `user/actor` as `user~actor`.
        let actor_id = require_setting(actor_id, "APIFY_ACTOR_ID")?.replace('/', "~");
        Ok(Self {
            http,
            token,
            actor_id,
            cities: cities_or_default(cities),
            max_events,
            base_url: DEFAULT_APIFY_BASE_URL.to_string(),
            max_wait_rounds: DEFAULT_MAX_WAIT_ROUNDS,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_wait_rounds(mut self, rounds: usize) -> Self {
        self.max_wait_rounds = rounds.max(1);
        self
    }

    pub fn cities(&self) -> &[String] {
        &self.cities
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    async fn start_run(&self, city: &str) -> Result<RunData, AdapterError> {
        let url = format!("{}/acts/{}/runs", self.base_url, self.actor_id);
        let input = ActorInput {
            search_queries: [city],
            start_urls: [],
            max_events: self.max_events,
        };
        let body = self.http.post_json(&url, Some(self.token.as_str()), &input).await?;
        run_data(body)
    }

    async fn wait_for_run(&self, run: RunData) -> Result<RunData, AdapterError> {
        let mut current = run;
        for _ in 0..self.max_wait_rounds {
            if let Some(outcome) = settled(&current) {
                return outcome.map(|()| current);
            }
            debug!(run_id = %current.id, status = %current.status, "apify run still in progress");
            let url = format!(
                "{}/actor-runs/{}?waitForFinish={WAIT_FOR_FINISH_SECS}",
                self.base_url, current.id
            );
            current = run_data(self.http.get_json(&url, Some(self.token.as_str())).await?)?;
        }

        match settled(&current) {
            Some(outcome) => outcome.map(|()| current),
            None => Err(AdapterError::Message(format!(
                "apify run {} still {} after {} polls",
                current.id, current.status, self.max_wait_rounds
            ))),
        }
    }

    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<JsonValue>, AdapterError> {
        let url = format!("{}/datasets/{dataset_id}/items?format=json", self.base_url);
        match self.http.get_json(&url, Some(self.token.as_str())).await? {
            JsonValue::Array(items) => Ok(items),
            other => Err(AdapterError::Message(format!(
                "dataset {dataset_id} returned {} instead of a list",
                json_kind(&other)
            ))),
        }
    }

    /// Items for one city. `Ok(None)` when the finished run has no dataset.
    async fn scrape_city(&self, city: &str) -> Result<Option<Vec<JsonValue>>, AdapterError> {
        let run = self.start_run(city).await?;
        info!(%city, run_id = %run.id, "apify run started");
        let finished = self.wait_for_run(run).await?;
        let Some(dataset_id) = finished.default_dataset_id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        let items = self.dataset_items(&dataset_id).await?;
        info!(%city, run_id = %finished.id, count = items.len(), "apify dataset fetched");
        Ok(Some(items))
    }
}

/// `None` while the run is still going.
fn settled(run: &RunData) -> Option<Result<(), AdapterError>> {
    match run.status.as_str() {
        "SUCCEEDED" => Some(Ok(())),
        "FAILED" | "ABORTED" | "TIMED-OUT" => Some(Err(AdapterError::Message(format!(
            "apify run {} finished with status {}",
            run.id, run.status
        )))),
        _ => None,
    }
}

fn run_data(body: JsonValue) -> Result<RunData, AdapterError> {
    serde_json::from_value::<ApiResponse<RunData>>(body)
        .map(|resp| resp.data)
        .map_err(|e| AdapterError::Message(format!("unexpected apify run payload: {e}")))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}

fn scraped_chunk(item: JsonValue, city: &str) -> PayloadChunk {
    let mut chunk = PayloadChunk::new();
    chunk.insert("apify_raw_item".into(), item);
    chunk.insert("fallback_city".into(), json!(city));
    chunk
}

impl EventProvider for ApifyProvider {
    fn provider_name(&self) -> &'static str {
        "apify_facebook"
    }

    fn fetch(&self) -> ChunkStream<'_> {
        Box::pin(stream! {
            for city in &self.cities {
                match self.scrape_city(city).await {
                    Ok(Some(items)) => {
                        for item in items {
                            yield Ok::<_, AdapterError>(scraped_chunk(item, city));
                        }
                    }
                    Ok(None) => warn!(%city, "apify run finished without a dataset; skipping city"),
                    Err(err) => error!(%city, error = %err, "apify scrape failed; skipping city"),
                }
            }
        })
    }
}
