//! Record store + HTTP transport for evhub.

mod http;
mod memory;
mod postgres;
mod store;

pub use http::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
pub use memory::{InMemoryEventStore, InMemoryUnitOfWork};
pub use postgres::{PgEventStore, PgUnitOfWork, MIGRATOR};
pub use store::{EventStore, EventUnitOfWork, StoreError, IDENTITY_CONSTRAINT};

pub const CRATE_NAME: &str = "evhub-storage";
