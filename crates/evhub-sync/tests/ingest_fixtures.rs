use std::path::PathBuf;

use evhub_adapters::FixtureProvider;
use evhub_core::EventQuery;
use evhub_storage::{EventStore, InMemoryEventStore};
use evhub_sync::run_ingestion;

fn fixture_provider() -> FixtureProvider {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures");
    FixtureProvider::new(dir).expect("workspace fixtures")
}

#[tokio::test]
async fn fixture_runs_are_idempotent() {
    let store = InMemoryEventStore::new();
    let provider = fixture_provider();

    let first = run_ingestion(&store, &provider, None).await.unwrap();
    assert_eq!(first.created, 6);
    assert_eq!(first.updated, 0);
    assert_eq!(first.skipped, 2);
    assert!(first.errors.is_empty(), "{:?}", first.errors);

    let second = run_ingestion(&store, &provider, None).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 6);
    assert_eq!(second.skipped, 2);

    let rows = store.snapshot().await;
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|row| row.has_exclusive_identity()));
    assert_eq!(rows.iter().filter(|row| row.fingerprint.is_some()).count(), 2);

    let page = store
        .list_events(&EventQuery::new(Some("pretoria".into()), None, None))
        .await
        .unwrap();
    let titles = page.events.iter().map(|e| e.title.as_str()).collect::<Vec<_>>();
    assert_eq!(
        titles,
        vec!["Rooftop Sessions", "Tshwane Food Market", "Pretoria Book Fair"]
    );
}

#[tokio::test]
async fn city_allowlist_limits_fixture_runs() {
    let store = InMemoryEventStore::new();
    let allow = vec!["Johannesburg".to_string()];

    let report = run_ingestion(&store, &fixture_provider(), Some(allow.as_slice()))
        .await
        .unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.skipped, 6);
    assert!(report.events.iter().all(|e| e.city == "Johannesburg"));
}
