//! Test helpers: a router wired to in-process fakes of the pre-authorizer,
//! the upstream and the zip-metadata program.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use axum_test::TestServer;
use bytes::Bytes;
use futures::stream;
use http::{HeaderMap, Method, Request, StatusCode};
use sluice_api::setup::routes;
use sluice_api::{AppState, Authorization, PreAuthorizer, Upstream};
use sluice_core::{AppError, Config, FieldSigner};
use sluice_processing::{MetricsSink, ZipMetadataRunner};
use sluice_storage::LocalStorage;
use tempfile::TempDir;

pub const SECRET: &str = "test-signing-secret-0123456789abcdef";

#[derive(Default)]
pub struct RecordingMetrics {
    outcomes: Mutex<Vec<&'static str>>,
}

impl RecordingMetrics {
    pub fn outcomes(&self) -> Vec<&'static str> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_zip_outcome(&self, outcome: &'static str) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}

pub struct FakePreAuthorizer {
    pub authorization: Mutex<Authorization>,
    pub reject_with: Mutex<Option<StatusCode>>,
    pub paths: Mutex<Vec<String>>,
}

#[async_trait]
impl PreAuthorizer for FakePreAuthorizer {
    async fn authorize(&self, path: &str, _headers: &HeaderMap) -> Result<Authorization, AppError> {
        self.paths.lock().unwrap().push(path.to_string());
        let rejection = *self.reject_with.lock().unwrap();
        match rejection {
            Some(status) if status == StatusCode::FORBIDDEN => {
                Err(AppError::Forbidden("denied".into()))
            }
            Some(_) => Err(AppError::Unauthorized("missing job token".into())),
            None => Ok(self.authorization.lock().unwrap().clone()),
        }
    }
}

/// What the fake upstream saw, captured while the request was in flight.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Text of every multipart field.
    pub fields: BTreeMap<String, String>,
    /// Contents of every stored file, keyed by the `.path` field naming it.
    pub stored: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct FakeUpstream {
    pub requests: Mutex<Vec<Captured>>,
}

impl FakeUpstream {
    pub fn last(&self) -> Captured {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("upstream was not called")
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

async fn parse_fields(headers: &HeaderMap, body: Bytes) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let Some(boundary) = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
    else {
        return fields;
    };

    let mut multipart = multer::Multipart::new(
        stream::once(async move { Ok::<_, std::io::Error>(body) }),
        boundary,
    );
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        fields.insert(name, field.text().await.unwrap());
    }
    fields
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn forward(&self, request: Request<Body>) -> Result<Response, AppError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let fields = parse_fields(&parts.headers, body.clone()).await;

        let stored = fields
            .iter()
            .filter(|(name, _)| name.ends_with(".path"))
            .filter_map(|(name, path)| fs::read(path).ok().map(|data| (name.clone(), data)))
            .collect();

        self.requests.lock().unwrap().push(Captured {
            method: parts.method,
            path: parts
                .uri
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default(),
            headers: parts.headers,
            body,
            fields,
            stored,
        });

        Ok(Response::builder()
            .status(StatusCode::CREATED)
            .header("x-upstream", "fake")
            .body(Body::from("{\"accepted\":true}"))
            .unwrap())
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub upstream: Arc<FakeUpstream>,
    pub preauthorizer: Arc<FakePreAuthorizer>,
    pub metrics: Arc<RecordingMetrics>,
    pub signer: FieldSigner,
    pub upload_dir: PathBuf,
    pub marker: PathBuf,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn authorize(&self, authorization: Authorization) {
        *self.preauthorizer.authorization.lock().unwrap() = authorization;
    }

    pub fn reject(&self, status: StatusCode) {
        *self.preauthorizer.reject_with.lock().unwrap() = Some(status);
    }

    /// Whether the zip-metadata program ran.
    pub fn program_ran(&self) -> bool {
        self.marker.exists()
    }
}

/// Router whose zip-metadata program is a shell script with `body`.
///
/// The script touches a marker file before running `body`.
pub async fn setup_test_app(script_body: &str) -> TestApp {
    let temp_dir = tempfile::tempdir().unwrap();
    let upload_dir = temp_dir.path().join("uploads");
    let marker = temp_dir.path().join("program-ran");

    let script = temp_dir.path().join("zip-metadata.sh");
    fs::write(
        &script,
        format!("#!/bin/sh\ntouch {}\n{}\n", marker.display(), script_body),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut vars = BTreeMap::new();
    vars.insert("SIGNING_SECRET", SECRET.to_string());
    vars.insert("LOCAL_TEMP_PATH", upload_dir.display().to_string());
    vars.insert("ZIP_METADATA_COMMAND", script.display().to_string());
    vars.insert("ZIP_METADATA_TIMEOUT_SECS", "10".to_string());
    vars.insert("MAX_FILES_PER_REQUEST", "5".to_string());
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let storage = LocalStorage::new(&upload_dir).await.unwrap();
    let metrics = Arc::new(RecordingMetrics::default());
    let upstream = Arc::new(FakeUpstream::default());
    let preauthorizer = Arc::new(FakePreAuthorizer {
        authorization: Mutex::new(Authorization::default()),
        reject_with: Mutex::new(None),
        paths: Mutex::new(Vec::new()),
    });
    let signer = FieldSigner::new(SECRET);

    let state = Arc::new(AppState {
        storage: Arc::new(storage),
        signer: signer.clone(),
        preauthorizer: preauthorizer.clone(),
        upstream: upstream.clone(),
        runner: Arc::new(ZipMetadataRunner::new(
            config.zip_metadata_command(),
            config.zip_metadata_timeout(),
            metrics.clone(),
        )),
        config,
    });

    let server = TestServer::new(routes::setup_routes(state)).unwrap();

    TestApp {
        server,
        upstream,
        preauthorizer,
        metrics,
        signer,
        upload_dir,
        marker,
        _temp_dir: temp_dir,
    }
}
