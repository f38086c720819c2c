//! JSON listing and health endpoints over the event store.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use evhub_core::{EventQuery, StoredEvent};
use evhub_storage::{EventStore, PgEventStore};
use evhub_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "evhub-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

/// Query parameters arrive as raw strings so junk values fall back to
/// defaults instead of rejecting the request.
#[derive(Debug, Deserialize, Default)]
struct EventsParams {
    city: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
}

impl EventsParams {
    fn to_query(&self) -> EventQuery {
        let number = |raw: &Option<String>| raw.as_deref().and_then(|v| v.trim().parse().ok());
        EventQuery::new(self.city.clone(), number(&self.page), number(&self.page_size))
    }
}

/// Public view of a stored event. Raw payloads and fingerprints stay internal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub start_date: Option<DateTime<Utc>>,
    pub venue_name: String,
    pub city: String,
    pub category: String,
    pub event_url: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StoredEvent> for EventSummary {
    fn from(event: StoredEvent) -> Self {
        Self {
            id: event.id,
            title: event.title,
            start_date: event.start_date,
            venue_name: event.venue_name,
            city: event.city,
            category: event.category,
            event_url: event.event_url,
            source: event.source,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventListResponse {
    pub count: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub results: Vec<EventSummary>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/events", get(events_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let store = PgEventStore::connect(&config.database_url).await?;
    let state = AppState::new(Arc::new(store));
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "evhub web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Response {
    match list_events(state.store.as_ref(), params.to_query()).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => server_error(err),
    }
}

async fn list_events(
    store: &dyn EventStore,
    query: EventQuery,
) -> anyhow::Result<EventListResponse> {
    let mut page = store.list_events(&query).await?;
    let clamped = query.clamped_to(page.count);
    if clamped.page != query.page {
        page = store.list_events(&clamped).await?;
    }
    let total_pages = clamped.total_pages(page.count);
    Ok(EventListResponse {
        count: page.count,
        page: clamped.page,
        page_size: clamped.page_size,
        total_pages,
        results: page.events.into_iter().map(EventSummary::from).collect(),
    })
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
        .into_response()
}
