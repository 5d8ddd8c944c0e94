//! Minimal Confluence content API served by axum on a random local port.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

pub const PAGE_ID: &str = "123";

pub struct MockPage {
    pub version: u64,
    pub title: String,
    pub body: String,
    /// Statuses returned (without applying the write) for the next PUTs.
    pub put_statuses: VecDeque<u16>,
    pub puts: Vec<Value>,
    pub authorizations: Vec<String>,
    pub queries: Vec<String>,
}

pub type SharedPage = Arc<Mutex<MockPage>>;

pub fn page(version: u64, body: &str) -> SharedPage {
    Arc::new(Mutex::new(MockPage {
        version,
        title: "FM: Shipment profit".to_string(),
        body: body.to_string(),
        put_statuses: VecDeque::new(),
        puts: Vec::new(),
        authorizations: Vec::new(),
        queries: Vec::new(),
    }))
}

/// Start the mock server and return its base URL.
pub async fn serve(state: SharedPage) -> String {
    let app = Router::new()
        .route("/rest/api/content/{id}", get(get_page).put(put_page))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn authorization(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn get_page(
    State(state): State<SharedPage>,
    Path(id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let mut page = state.lock().unwrap();
    page.authorizations.push(authorization(&headers));
    page.queries.push(uri.query().unwrap_or_default().to_string());
    if id != PAGE_ID {
        return (StatusCode::NOT_FOUND, "No content found with id").into_response();
    }
    Json(json!({
        "id": id,
        "type": "page",
        "title": page.title,
        "version": { "number": page.version },
        "body": { "storage": { "value": page.body, "representation": "storage" } }
    }))
    .into_response()
}

async fn put_page(
    State(state): State<SharedPage>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let mut page = state.lock().unwrap();
    page.authorizations.push(authorization(&headers));
    page.puts.push(payload.clone());

    if id != PAGE_ID {
        return (StatusCode::NOT_FOUND, "No content found with id").into_response();
    }
    if let Some(status) = page.put_statuses.pop_front() {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, "scripted failure").into_response();
    }

    let number = payload["version"]["number"].as_u64().unwrap_or(0);
    if number != page.version + 1 {
        return (
            StatusCode::CONFLICT,
            "Version must be incremented on update",
        )
            .into_response();
    }

    page.version = number;
    page.body = payload["body"]["storage"]["value"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    Json(json!({
        "id": id,
        "type": "page",
        "title": page.title,
        "version": { "number": page.version }
    }))
    .into_response()
}

/// Config pointing at `base_url` with every directory under `root`.
pub fn config_toml(base_url: &str, root: &std::path::Path) -> String {
    format!(
        r#"[remote]
base_url = "{base_url}"
auth_token = "test-token"
timeout_secs = 5

[lock]
dir = "{root}/.locks"
timeout_secs = 5
poll_interval_ms = 10

[backup]
dir = "{root}/.backups"

[retry]
max_retries = 3
backoff_base_ms = 1
backoff_cap_ms = 5
jitter = 0.0

[audit]
dir = "{root}/.audit_log"
"#,
        root = root.display()
    )
}
