mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config_toml, page, serve, PAGE_ID};
use doc_sync::config::parse_config;
use doc_sync::connector_confluence::ConfluenceStore;
use doc_sync::{RemoteStore, SafeUpdater, StoreError, UpdateError, UpdateRequest, WriteRequest};
use tempfile::TempDir;

fn store(base_url: &str) -> ConfluenceStore {
    ConfluenceStore::new(base_url, "test-token", Duration::from_secs(5), false).unwrap()
}

fn write_request(base_version: u64, content: &str) -> WriteRequest {
    WriteRequest {
        document_id: PAGE_ID.to_string(),
        base_version,
        content: content.to_string(),
        title: Some("FM: Shipment profit".to_string()),
        message: Some("[FM 1.0.7] Updated section 3".to_string()),
    }
}

#[tokio::test]
async fn fetch_reads_storage_body_and_version() {
    let state = page(41, "<p>A</p>");
    let base_url = serve(state.clone()).await;

    let doc = store(&base_url).fetch(PAGE_ID).await.unwrap();

    assert_eq!(doc.id, PAGE_ID);
    assert_eq!(doc.version, 41);
    assert_eq!(doc.content, "<p>A</p>");
    assert_eq!(doc.title.as_deref(), Some("FM: Shipment profit"));

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.authorizations, vec!["Bearer test-token"]);
    assert!(recorded.queries[0].contains("expand=body.storage"));
}

#[tokio::test]
async fn fetch_of_unknown_page_is_not_found() {
    let base_url = serve(page(1, "")).await;

    let err = store(&base_url).fetch("999").await.unwrap_err();

    assert_eq!(err, StoreError::NotFound("999".to_string()));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn write_sends_next_version_number() {
    let state = page(41, "<p>A</p>");
    let base_url = serve(state.clone()).await;

    let ack = store(&base_url)
        .write(&write_request(41, "<p>AB</p>"))
        .await
        .unwrap();

    assert_eq!(ack.new_version, 42);
    let recorded = state.lock().unwrap();
    assert_eq!(recorded.version, 42);
    assert_eq!(recorded.body, "<p>AB</p>");
    let payload = &recorded.puts[0];
    assert_eq!(payload["version"]["number"], 42);
    assert_eq!(payload["version"]["message"], "[FM 1.0.7] Updated section 3");
    assert_eq!(payload["title"], "FM: Shipment profit");
}

#[tokio::test]
async fn stale_write_maps_to_conflict() {
    let state = page(42, "<p>changed</p>");
    let base_url = serve(state.clone()).await;

    let err = store(&base_url)
        .write(&write_request(41, "<p>AB</p>"))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(state.lock().unwrap().body, "<p>changed</p>");
}

#[tokio::test]
async fn server_errors_are_transient_and_client_errors_are_not() {
    let state = page(41, "<p>A</p>");
    state.lock().unwrap().put_statuses.extend([503, 403]);
    let base_url = serve(state.clone()).await;
    let store = store(&base_url);

    let unavailable = store.write(&write_request(41, "x")).await.unwrap_err();
    assert!(matches!(unavailable, StoreError::Http { status: 503, .. }));
    assert!(unavailable.is_transient());

    let forbidden = store.write(&write_request(41, "x")).await.unwrap_err();
    assert!(matches!(forbidden, StoreError::Http { status: 403, .. }));
    assert!(!forbidden.is_transient());
}

#[tokio::test]
async fn refused_connection_is_transient() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = store(&format!("http://{addr}"))
        .fetch(PAGE_ID)
        .await
        .unwrap_err();

    assert!(err.is_transient(), "unexpected {err:?}");
}

#[tokio::test]
async fn updater_retries_over_http() {
    let tmp = TempDir::new().unwrap();
    let state = page(41, "<p>A</p>");
    state.lock().unwrap().put_statuses.push_back(503);
    let base_url = serve(state.clone()).await;

    let config = parse_config(&config_toml(&base_url, tmp.path())).unwrap();
    let updater = SafeUpdater::from_config(&config).unwrap();

    let request = UpdateRequest::new(PAGE_ID, 41)
        .message("Updated section 3")
        .revision_label("1.0.7");
    let report = updater
        .update(&request, |c| format!("{c}<p>B</p>"))
        .await
        .unwrap();

    assert_eq!(report.new_version, 42);
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.backups.len(), 2);

    {
        let recorded = state.lock().unwrap();
        assert_eq!(recorded.body, "<p>A</p><p>B</p>");
        assert_eq!(recorded.puts.len(), 2);
    }

    let history = updater.audit().unwrap().entries(PAGE_ID).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 42);
}

#[tokio::test]
async fn updater_stops_on_forbidden() {
    let tmp = TempDir::new().unwrap();
    let state = page(41, "<p>A</p>");
    state.lock().unwrap().put_statuses.push_back(403);
    let base_url = serve(state.clone()).await;

    let config = parse_config(&config_toml(&base_url, tmp.path())).unwrap();
    let updater = SafeUpdater::with_store(&config, Arc::new(store(&base_url)));

    let err = updater
        .update(&UpdateRequest::new(PAGE_ID, 41), |c| format!("{c}!"))
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::PermanentFailure { attempts: 1, .. }));
    let recorded = state.lock().unwrap();
    assert_eq!(recorded.puts.len(), 1);
    assert_eq!(recorded.version, 41);
}

#[tokio::test]
async fn updater_reports_remote_conflict() {
    let tmp = TempDir::new().unwrap();
    let state = page(43, "<p>someone else</p>");
    let base_url = serve(state.clone()).await;

    let config = parse_config(&config_toml(&base_url, tmp.path())).unwrap();
    let updater = SafeUpdater::from_config(&config).unwrap();

    let err = updater
        .update(&UpdateRequest::new(PAGE_ID, 41), |c| format!("{c}!"))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(err.to_string().contains("expected version 41, found 43"));
    assert!(state.lock().unwrap().puts.is_empty());
}
