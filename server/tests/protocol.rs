//! End-to-end protocol tests against an in-process router.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::ServiceExt;

use tusk::api::tus;
use tusk::metadata;
use tusk_server::config::{
    CallbackConfig, Config, DatabaseConfig, ExpirationConfig, LocalStorageConfig, S3StorageConfig,
    StorageConfig,
};
use tusk_server::database::entity::file_info::{self, Entity as FileInfo, UploadStatus};
use tusk_server::database::TuskDatabase;
use tusk_server::{build_state, make_router, sweeper, State};

/// SHA-256 of "hello".
const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

struct TestServer {
    state: State,
    router: Router,
    objects_dir: PathBuf,
    _dir: TempDir,
}

async fn test_server(mutate: impl FnOnce(&mut Config)) -> TestServer {
    let dir = TempDir::new().unwrap();
    let objects_dir = dir.path().join("objects");

    let mut config = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        api_endpoint: "http://localhost:8080".to_string(),
        storage_path: dir.path().join("staging"),
        max_upload_size: 1024 * 1024,
        allowed_extensions: Vec::new(),
        database: DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("tusk.db").display()),
        },
        storage: StorageConfig::Local(LocalStorageConfig {
            path: objects_dir.clone(),
        }),
        expiration: ExpirationConfig::default(),
        callback: CallbackConfig::default(),
    };
    mutate(&mut config);

    let state = build_state(config).await.unwrap();
    let router = make_router(state.clone());

    TestServer {
        state,
        router,
        objects_dir,
        _dir: dir,
    }
}

async fn send(server: &TestServer, request: Request<Body>) -> axum::response::Response {
    server.router.clone().oneshot(request).await.unwrap()
}

fn create_request(length: i64, meta: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/files")
        .header("Upload-Length", length);
    if let Some(meta) = meta {
        builder = builder.header("Upload-Metadata", meta);
    }
    builder.body(Body::empty()).unwrap()
}

fn patch_request(uri: &str, offset: i64, body: impl Into<Vec<u8>>) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("Content-Type", "application/offset+octet-stream")
        .header("Upload-Offset", offset)
        .body(Body::from(body.into()))
        .unwrap()
}

fn head_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("HEAD")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn header<'r>(response: &'r axum::response::Response, name: &str) -> &'r str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_else(|| panic!("missing header {}", name))
}

/// Creates an upload and returns its `/files/<id>` path.
async fn created_uri(server: &TestServer, length: i64, meta: Option<String>) -> String {
    let response = send(server, create_request(length, meta)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header(&response, "Upload-Offset"), "0");

    let location = header(&response, "Location");
    location
        .strip_prefix("http://localhost:8080")
        .expect("Location should be under the configured endpoint")
        .to_string()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn fetch_row(server: &TestServer, uri: &str) -> file_info::Model {
    server
        .state
        .db
        .find_by_uri(uri)
        .await
        .unwrap()
        .expect("row should exist")
}

#[tokio::test]
async fn test_discover_advertises_capabilities() {
    let server = test_server(|_| {}).await;

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/files")
        .body(Body::empty())
        .unwrap();
    let response = send(&server, request).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "Tus-Resumable"), "1.0.0");
    assert_eq!(header(&response, "Tus-Version"), "1.0.0");
    assert_eq!(header(&response, "Tus-Max-Size"), "1048576");
    assert_eq!(
        header(&response, "Tus-Extension"),
        "creation,termination,checksum,expiration"
    );
}

#[tokio::test]
async fn test_create_append_verify_promote() {
    let server = test_server(|_| {}).await;

    let meta = metadata::encode([("filename", "test.txt"), ("checksum", HELLO_SHA256)]);
    let uri = created_uri(&server, 5, Some(meta)).await;
    let id = tus::upload_id(&uri).to_string();

    let response = send(&server, patch_request(&uri, 0, &b"hello"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "Upload-Offset"), "5");
    assert_eq!(header(&response, "Tus-Resumable"), "1.0.0");

    let row = fetch_row(&server, &uri).await;
    assert_eq!(row.offset_bytes, 5);
    assert_eq!(row.status, UploadStatus::Transferred);
    assert!(row.checksum_verified);
    assert_eq!(row.object_key.as_deref(), Some(format!("{}/test.txt", id).as_str()));
    assert!(!row.callback_sent);

    // the promoted object holds the uploaded bytes
    let object = std::fs::read(server.objects_dir.join(format!("{}/test.txt", id))).unwrap();
    assert_eq!(object, b"hello");

    // the staging copy survives until the sweeper claims it
    assert!(server.state.staging.len(&id).await.is_ok());
}

#[tokio::test]
async fn test_head_reports_offset_for_resume() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;

    let response = send(&server, patch_request(&uri, 0, &b"abcd"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "Upload-Offset"), "4");

    let response = send(&server, head_request(&uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "Upload-Offset"), "4");
    assert_eq!(header(&response, "Upload-Length"), "10");
    assert_eq!(header(&response, "Cache-Control"), "no-store");

    let response = send(&server, patch_request(&uri, 4, &b"efghij"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "Upload-Offset"), "10");

    let row = fetch_row(&server, &uri).await;
    assert_eq!(row.status, UploadStatus::Transferred);
    // no client checksum was declared
    assert!(!row.checksum_verified);

    let id = tus::upload_id(&uri);
    let staged = std::fs::read(server.state.staging.path(id)).unwrap();
    assert_eq!(staged, b"abcdefghij");
}

#[tokio::test]
async fn test_append_with_stale_offset_conflicts() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;

    let response = send(&server, patch_request(&uri, 0, &b"abcd"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&server, patch_request(&uri, 2, &b"xyz"[..])).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains('4'), "conflict body should carry the server offset: {}", body);

    // state unchanged
    let response = send(&server, head_request(&uri)).await;
    assert_eq!(header(&response, "Upload-Offset"), "4");
    let row = fetch_row(&server, &uri).await;
    assert_eq!(row.status, UploadStatus::Uploading);
}

#[tokio::test]
async fn test_create_rejects_disallowed_extension() {
    let server = test_server(|config| {
        config.allowed_extensions = vec![".pdf".to_string()];
    })
    .await;

    let meta = metadata::encode([("filename", "pic.png")]);
    let response = send(&server, create_request(100, Some(meta))).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // no row and no staging file were left behind
    assert!(server.state.db.list_all().await.unwrap().is_empty());
    let staged: Vec<_> = std::fs::read_dir(&server.state.config.storage_path)
        .unwrap()
        .collect();
    assert!(staged.is_empty());
}

#[tokio::test]
async fn test_extension_allow_list_is_case_insensitive() {
    let server = test_server(|config| {
        config.allowed_extensions = vec![".pdf".to_string()];
    })
    .await;

    let meta = metadata::encode([("filename", "Report.PDF")]);
    let response = send(&server, create_request(100, Some(meta))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_create_rejects_oversize_upload() {
    let server = test_server(|config| {
        config.max_upload_size = 1024;
    })
    .await;

    let response = send(&server, create_request(2048, None)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_append_requires_offset_header() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 5, None).await;

    let request = Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("Content-Type", "application/offset+octet-stream")
        .body(Body::from(&b"hello"[..]))
        .unwrap();
    let response = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_append_requires_offset_content_type() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 5, None).await;

    let request = Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("Content-Type", "application/octet-stream")
        .header("Upload-Offset", 0)
        .body(Body::from(&b"hello"[..]))
        .unwrap();
    let response = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_unknown_upload_returns_not_found() {
    let server = test_server(|_| {}).await;

    let response = send(&server, head_request("/files/does-not-exist")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&server, patch_request("/files/does-not-exist", 0, &b"x"[..])).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_terminate_exactly_once() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;
    let id = tus::upload_id(&uri).to_string();

    let delete = |uri: String| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let response = send(&server, delete(uri.clone())).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // repeated termination and inspection both miss
    let response = send(&server, delete(uri.clone())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(&server, head_request(&uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert!(server.state.staging.len(&id).await.is_err());
}

#[tokio::test]
async fn test_sweeper_expires_idle_sessions() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;
    let id = tus::upload_id(&uri).to_string();

    let response = send(&server, patch_request(&uri, 0, &b"a"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // push the session past the 24h idle threshold
    FileInfo::update_many()
        .col_expr(
            file_info::Column::UpdatedAt,
            Expr::value(Utc::now() - chrono::Duration::hours(25)),
        )
        .filter(file_info::Column::UploadUri.eq(uri.clone()))
        .exec(&server.state.db)
        .await
        .unwrap();

    let removed = sweeper::sweep_once(&server.state).await.unwrap();
    assert_eq!(removed, 1);

    let response = send(&server, head_request(&uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(server.state.staging.len(&id).await.is_err());
}

#[tokio::test]
async fn test_sweeper_skips_sessions_that_advanced() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;

    let row = fetch_row(&server, &uri).await;

    // a delete gated on an outdated observation must not fire
    let stale_observation = row.updated_at - chrono::Duration::seconds(10);
    let deleted = server
        .state
        .db
        .delete_if_untouched(&uri, stale_observation)
        .await
        .unwrap();
    assert!(!deleted);
    assert!(server.state.db.find_by_uri(&uri).await.unwrap().is_some());

    // gated on the current observation it fires exactly once
    let deleted = server
        .state
        .db
        .delete_if_untouched(&uri, row.updated_at)
        .await
        .unwrap();
    assert!(deleted);
}

#[tokio::test]
async fn test_sweeper_ignores_fresh_sessions() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;

    let removed = sweeper::sweep_once(&server.state).await.unwrap();
    assert_eq!(removed, 0);
    assert!(server.state.db.find_by_uri(&uri).await.unwrap().is_some());
}

#[tokio::test]
async fn test_promotion_failure_marks_failed_and_drops_staging() {
    // nothing listens on this endpoint, so the object-store put fails
    let server = test_server(|config| {
        config.storage = StorageConfig::S3(S3StorageConfig {
            region: "us-east-1".to_string(),
            bucket: "uploads".to_string(),
            endpoint: Some("http://127.0.0.1:1".to_string()),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
        });
    })
    .await;

    let uri = created_uri(&server, 5, None).await;
    let id = tus::upload_id(&uri).to_string();

    let response = send(&server, patch_request(&uri, 0, &b"hello"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let row = fetch_row(&server, &uri).await;
    assert_eq!(row.status, UploadStatus::Failed);
    assert!(row.object_key.is_none());

    // failed sessions do not keep a staging file
    assert!(server.state.staging.len(&id).await.is_err());
}

#[tokio::test]
async fn test_checksum_mismatch_is_recorded_not_fatal() {
    let server = test_server(|_| {}).await;

    let wrong = "0".repeat(64);
    let meta = metadata::encode([("filename", "test.txt"), ("checksum", wrong.as_str())]);
    let uri = created_uri(&server, 5, Some(meta)).await;

    let response = send(&server, patch_request(&uri, 0, &b"hello"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let row = fetch_row(&server, &uri).await;
    assert_eq!(row.status, UploadStatus::Transferred);
    assert!(!row.checksum_verified);
}

#[tokio::test]
async fn test_checksum_comparison_ignores_case() {
    let server = test_server(|_| {}).await;

    let upper = HELLO_SHA256.to_uppercase();
    let meta = metadata::encode([("filename", "test.txt"), ("checksum", upper.as_str())]);
    let uri = created_uri(&server, 5, Some(meta)).await;

    send(&server, patch_request(&uri, 0, &b"hello"[..])).await;

    let row = fetch_row(&server, &uri).await;
    assert!(row.checksum_verified);
}

#[tokio::test]
async fn test_excess_bytes_are_discarded() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 5, None).await;
    let id = tus::upload_id(&uri).to_string();

    let response = send(&server, patch_request(&uri, 0, &b"hellogarbage"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "Upload-Offset"), "5");

    let staged = std::fs::read(server.state.staging.path(&id)).unwrap();
    assert_eq!(staged, b"hello");

    let row = fetch_row(&server, &uri).await;
    assert_eq!(row.status, UploadStatus::Transferred);
}

#[tokio::test]
async fn test_offset_survives_restart() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;

    send(&server, patch_request(&uri, 0, &b"abcd"[..])).await;

    // a second state over the same staging directory and database sees the
    // persisted offset
    let state = build_state(server.state.config.clone()).await.unwrap();
    let router = make_router(state);

    let response = router.oneshot(head_request(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "Upload-Offset"), "4");
}

#[tokio::test]
async fn test_progress_projection() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;
    let id = tus::upload_id(&uri).to_string();

    send(&server, patch_request(&uri, 0, &b"abcd"[..])).await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/progress/{}", id))
        .body(Body::empty())
        .unwrap();
    let response = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let progress: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(progress["uploadURI"], uri.as_str());
    assert_eq!(progress["offset"], 4);
    assert_eq!(progress["totalSize"], 10);
    assert_eq!(progress["status"], "uploading");
    assert_eq!(progress["percent"], 40.0);
    assert_eq!(progress["callbackSent"], false);
}

#[tokio::test]
async fn test_progress_list() {
    let server = test_server(|_| {}).await;
    created_uri(&server, 10, None).await;
    created_uri(&server, 20, None).await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/progress/list")
        .body(Body::empty())
        .unwrap();
    let response = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let list: Vec<serde_json::Value> =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(list.len(), 2);
}

#[tokio::test]
async fn test_find_by_status_partitions_sessions() {
    let server = test_server(|_| {}).await;

    let finished = created_uri(&server, 5, None).await;
    send(&server, patch_request(&finished, 0, &b"hello"[..])).await;
    created_uri(&server, 10, None).await;

    let transferred = server
        .state
        .db
        .find_by_status(UploadStatus::Transferred)
        .await
        .unwrap();
    assert_eq!(transferred.len(), 1);
    assert_eq!(transferred[0].upload_uri, finished);

    let uploading = server
        .state
        .db
        .find_by_status(UploadStatus::Uploading)
        .await
        .unwrap();
    assert_eq!(uploading.len(), 1);
}

#[tokio::test]
async fn test_download_streams_promoted_object() {
    let server = test_server(|_| {}).await;

    let meta = metadata::encode([("filename", "test.txt")]);
    let uri = created_uri(&server, 5, Some(meta)).await;
    let id = tus::upload_id(&uri).to_string();
    send(&server, patch_request(&uri, 0, &b"hello"[..])).await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/files/{}/download", id))
        .body(Body::empty())
        .unwrap();
    let response = send(&server, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "Content-Disposition").contains("test.txt"));
    assert_eq!(body_bytes(response).await, b"hello");
}

#[tokio::test]
async fn test_download_rejects_in_flight_upload() {
    let server = test_server(|_| {}).await;
    let uri = created_uri(&server, 10, None).await;
    let id = tus::upload_id(&uri).to_string();

    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/files/{}/download", id))
        .body(Body::empty())
        .unwrap();
    let response = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_webhook_delivery_latches_callback_sent() {
    let (hook_url, received) = spawn_webhook_sink().await;

    let server = test_server(|config| {
        config.callback = CallbackConfig {
            enabled: true,
            url: Some(hook_url),
        };
    })
    .await;

    let meta = metadata::encode([("filename", "test.txt"), ("checksum", HELLO_SHA256)]);
    let uri = created_uri(&server, 5, Some(meta)).await;
    let id = tus::upload_id(&uri).to_string();

    let response = send(&server, patch_request(&uri, 0, &b"hello"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let row = fetch_row(&server, &uri).await;
    assert!(row.callback_sent);

    let notices = received.lock().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["uploadURI"], uri.as_str());
    assert_eq!(notices[0]["fileName"], "test.txt");
    assert_eq!(notices[0]["totalSize"], 5);
    assert_eq!(notices[0]["status"], "transferred");
    assert_eq!(notices[0]["objectKey"], format!("{}/test.txt", id).as_str());
    assert_eq!(notices[0]["checksumVerified"], true);
}

#[tokio::test]
async fn test_webhook_failure_does_not_taint_status() {
    // nothing listens on this port
    let server = test_server(|config| {
        config.callback = CallbackConfig {
            enabled: true,
            url: Some("http://127.0.0.1:1/hook".to_string()),
        };
    })
    .await;

    let uri = created_uri(&server, 5, None).await;
    let response = send(&server, patch_request(&uri, 0, &b"hello"[..])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let row = fetch_row(&server, &uri).await;
    assert_eq!(row.status, UploadStatus::Transferred);
    assert!(!row.callback_sent);
}

async fn spawn_webhook_sink() -> (String, Arc<Mutex<Vec<serde_json::Value>>>) {
    let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();

    let app = Router::new().route(
        "/hook",
        axum::routing::post(
            move |axum::Json(payload): axum::Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().await.push(payload);
                    StatusCode::OK
                }
            },
        ),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/hook", addr), received)
}
