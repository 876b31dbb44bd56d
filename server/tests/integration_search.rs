use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pkgsearch_core::{PackageRecord, RecordStore};
use pkgsearch_server::{build_app, build_state, AppState, ServerConfig};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

const TOKEN: &str = "secret";

fn record(path: &str, synopsis: &str, popularity: u64) -> PackageRecord {
    serde_json::from_value(json!({
        "module_path": "std",
        "package_path": path,
        "version": "v1.12.0",
        "name": path.rsplit('/').next().unwrap_or_default(),
        "synopsis": synopsis,
        "licenses": ["BSD-3-Clause"],
        "commit_time": "2019-02-25T20:00:00Z",
        "num_imported_by": popularity,
    }))
    .unwrap()
}

fn setup() -> (TempDir, AppState, Router) {
    let dir = tempdir().unwrap();
    let config = ServerConfig {
        store: dir.path().join("store"),
        admin_token: Some(TOKEN.to_string()),
        cors_allow_origin: None,
        refresh_interval: None,
    };
    let state = build_state(&config).unwrap();
    let app = build_app(state.clone(), &config);
    (dir, state, app)
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("X-ADMIN-TOKEN", token);
    }
    let body = body.map(|v| Body::from(v.to_string())).unwrap_or_else(Body::empty);
    builder.body(body).unwrap()
}

async fn seed_and_refresh(state: &AppState, app: &Router) {
    let store = state.coordinator.source();
    store.put(record("net/http", "HTTP client and server", 500)).unwrap();
    store.put(record("net/http/httptest", "HTTP testing utilities", 10)).unwrap();
    let (status, body) = call(app, post("/refresh", Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "published");
    assert_eq!(json["documents"], 2);
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let (_dir, state, app) = setup();
    seed_and_refresh(&state, &app).await;

    let (status, body) = call(&app, get("/search?q=http&limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_matches"], 2);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["package_path"], "net/http");
    assert_eq!(arr[1]["package_path"], "net/http/httptest");
    assert!(arr[0]["rank"].as_f64().unwrap() > arr[1]["rank"].as_f64().unwrap());
    assert_eq!(arr[0]["commit_time"], "2019-02-25T20:00:00Z");

    let (_, body) = call(&app, get("/search?q=http&limit=1&offset=1")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["results"][0]["package_path"], "net/http/httptest");
    assert_eq!(json["results"][0]["total_matches"], 2);

    let (status, body) = call(&app, get("/search?q=http&offset=10")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["results"].as_array().unwrap().is_empty());
    assert_eq!(json["total_matches"], 2);
}

#[tokio::test]
async fn zero_limit_is_bad_request() {
    let (_dir, _state, app) = setup();
    let (status, _) = call(&app, get("/search?q=http&limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_need_the_token() {
    let (_dir, _state, app) = setup();
    let (status, _) = call(&app, post("/refresh", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, post("/refresh", Some("wrong"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn inserted_packages_are_searchable() {
    let (_dir, _state, app) = setup();
    let record = serde_json::to_value(record("golang.org/x/net/html", "HTML5 tokenizer and parser", 42)).unwrap();
    let (status, body) = call(&app, post("/packages", Some(TOKEN), Some(record))).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["outcome"], "inserted");

    let (_, body) = call(&app, get("/search?q=x/net/html")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["results"][0]["package_path"], "golang.org/x/net/html");

    let (status, body) = call(&app, get("/package/golang.org/x/net/html")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["num_imported_by"], 42);
    assert!(json["snapshot_built_at"].as_str().unwrap().ends_with('Z'));

    let (status, _) = call(&app, get("/package/golang.org/x/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_record_is_rejected() {
    let (_dir, _state, app) = setup();
    let mut bad = serde_json::to_value(record("net/url", "URL parsing", 1)).unwrap();
    bad["version"] = json!("latest");
    let (status, _) = call(&app, post("/packages", Some(TOKEN), Some(bad))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_insert_publishes_one_generation() {
    let (_dir, state, app) = setup();
    let before = state.coordinator.current().generation;
    let batch = json!([
        record("golang.org/x/net/html", "HTML5 tokenizer and parser", 42),
        record("golang.org/x/net/html/atom", "HTML atom table", 4),
        record("golang.org/x/net/http2", "HTTP/2 support", 17),
    ]);
    let (status, body) = call(&app, post("/packages/batch", Some(TOKEN), Some(batch))).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["generation"], before + 1);
    assert_eq!(json["outcomes"], json!(["inserted", "inserted", "inserted"]));
    assert_eq!(state.coordinator.current().generation, before + 1);
    assert_eq!(state.coordinator.source().len(), 3);

    let (_, body) = call(&app, get("/search?q=x/net")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_matches"], 3);

    let (status, _) = call(&app, post("/packages/batch", None, Some(json!([])))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut bad = serde_json::to_value(record("net/url", "URL parsing", 1)).unwrap();
    bad["version"] = json!("latest");
    let ok = serde_json::to_value(record("net/mail", "mail parsing", 1)).unwrap();
    let (status, _) = call(&app, post("/packages/batch", Some(TOKEN), Some(json!([ok, bad])))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.coordinator.source().len(), 3);
}
